//! Cradle CLI - Command-line interface for Cradle Forecast
//!
//! Commands:
//! - report: Full household report (both subjects, sync, alerts)
//! - predict: Next feed for one subject
//! - sleep: Next nap and bedtime for one subject
//! - insights: Feed/sleep correlations for one subject
//! - profiles: Print or check subject profiles
//! - doctor: Diagnose configuration, profiles and input

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::Level;

use cradle_forecast::clock::{clock_minutes, format_clock, parse_timestamp};
use cradle_forecast::{
    ComputeError, EngineConfig, ForecastEngine, HouseholdReport, ProfileSet, Snapshot, Subject, Timestamp,
    ENGINE_VERSION, PRODUCER_NAME,
};

/// Cradle - feeding and sleep forecasts for two co-tracked infants
#[derive(Parser)]
#[command(name = "cradle")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Forecast feeds, naps and bedtimes from a household log", long_about = None)]
struct Cli {
    /// Increase log verbosity on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by every forecasting command
#[derive(Args)]
struct EngineArgs {
    /// Snapshot JSON or NDJSON event log (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Reference time, e.g. 2024-03-10T14:00:00 (defaults to the local clock)
    #[arg(long)]
    now: Option<String>,

    /// Engine configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Profiles JSON (overrides profiles embedded in the snapshot)
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Full household report
    Report {
        #[command(flatten)]
        engine: EngineArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Next feed for one subject
    Predict {
        #[command(flatten)]
        engine: EngineArgs,

        #[arg(short, long, value_enum)]
        subject: SubjectArg,
    },

    /// Next nap and bedtime for one subject
    Sleep {
        #[command(flatten)]
        engine: EngineArgs,

        #[arg(short, long, value_enum)]
        subject: SubjectArg,
    },

    /// Feed/sleep correlations for one subject
    Insights {
        #[command(flatten)]
        engine: EngineArgs,

        #[arg(short, long, value_enum)]
        subject: SubjectArg,

        /// Only the insight rotated in for the current time of day
        #[arg(long)]
        contextual: bool,
    },

    /// Print the default profiles, or validate a profiles file
    Profiles {
        /// Profiles file to validate instead of printing defaults
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Diagnose configuration, profiles and input
    Doctor {
        /// Check configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check profiles file
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Check snapshot file
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SubjectArg {
    A,
    B,
}

impl From<SubjectArg> for Subject {
    fn from(arg: SubjectArg) -> Self {
        match arg {
            SubjectArg::A => Subject::A,
            SubjectArg::B => Subject::B,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CradleCliError> {
    match cli.command {
        Commands::Report { engine, output } => cmd_report(&engine, &output),
        Commands::Predict { engine, subject } => cmd_predict(&engine, subject.into()),
        Commands::Sleep { engine, subject } => cmd_sleep(&engine, subject.into()),
        Commands::Insights {
            engine,
            subject,
            contextual,
        } => cmd_insights(&engine, subject.into(), contextual),
        Commands::Profiles { check } => cmd_profiles(check.as_deref()),
        Commands::Doctor {
            config,
            profiles,
            input,
            json,
        } => cmd_doctor(config.as_deref(), profiles.as_deref(), input.as_deref(), json),
    }
}

/// Everything a forecasting command needs
struct Session {
    engine: ForecastEngine,
    snapshot: Snapshot,
    now: Timestamp,
    format: OutputFormat,
}

impl Session {
    fn load(args: &EngineArgs) -> Result<Self, CradleCliError> {
        let snapshot = Snapshot::parse(&read_input(&args.input)?)?;
        let config = match &args.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        let profiles = match &args.profiles {
            Some(path) => ProfileSet::from_json(&fs::read_to_string(path)?)?,
            None => snapshot.profiles.clone().unwrap_or_default(),
        };
        let now = match &args.now {
            Some(raw) => parse_timestamp(raw)?,
            None => chrono::Local::now().naive_local(),
        };
        tracing::info!(
            feeds = snapshot.feeds.len(),
            sleeps = snapshot.sleeps.len(),
            %now,
            "snapshot loaded"
        );
        Ok(Self {
            engine: ForecastEngine::try_new(config, profiles)?,
            snapshot,
            now,
            format: args.format,
        })
    }

    /// Print `value` as JSON, or `text` for the human-readable format
    fn emit<T: serde::Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<(), CradleCliError> {
        println!("{}", self.render(value, text)?);
        Ok(())
    }

    fn render<T: serde::Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<String, CradleCliError> {
        Ok(match self.format {
            OutputFormat::Text => text(),
            OutputFormat::Json => serde_json::to_string(value)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
        })
    }
}

fn read_input(input: &Path) -> Result<String, CradleCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(CradleCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn clock(ts: Timestamp) -> String {
    format_clock(clock_minutes(ts))
}

fn cmd_report(args: &EngineArgs, output: &Path) -> Result<(), CradleCliError> {
    let session = Session::load(args)?;
    let report = session.engine.report(&session.snapshot, session.now);
    let rendered = session.render(&report, || report_text(&report))?;

    if output.to_string_lossy() == "-" {
        println!("{}", rendered);
    } else {
        fs::write(output, rendered)?;
    }
    Ok(())
}

fn report_text(report: &HouseholdReport) -> String {
    let mut lines = vec![format!("Rapport du {}", report.generated_at.format("%Y-%m-%d %H:%M"))];
    for subject in &report.subjects {
        let p = &subject.prediction;
        lines.push(format!(
            "{} ({}): repas vers {} (±{:.0} min), {:.0} ml, confiance {:?}{}",
            subject.name,
            subject.subject.as_str(),
            clock(p.timing.predicted_at),
            p.timing.confidence_minutes,
            p.volume.ml,
            p.confidence,
            if p.profile_fallback { " [profil]" } else { "" }
        ));
        if let Some(nap) = &subject.sleep.next_nap {
            lines.push(format!("  sieste vers {}", clock(nap.at)));
        }
        if let Some(bedtime) = &subject.sleep.bedtime {
            lines.push(format!("  coucher vers {}", clock(bedtime.at)));
        }
        if let Some(insight) = &subject.contextual_insight {
            lines.push(format!("  {}", insight.message));
        }
        if let Some(score) = subject.day_accuracy {
            lines.push(format!("  précision du jour : {:.0}%", score * 100.0));
        }
    }
    lines.push(format!(
        "Synchronisation : {:?} (écart {:.0} min)",
        report.sync.state, report.sync.gap_minutes
    ));
    for alert in &report.alerts {
        lines.push(format!("[ALERTE] {}", alert.message));
    }
    lines.join("\n")
}

fn cmd_predict(args: &EngineArgs, subject: Subject) -> Result<(), CradleCliError> {
    let session = Session::load(args)?;
    let prediction = session.engine.predict_next_feed(
        subject,
        &session.snapshot.feeds,
        &session.snapshot.sleeps,
        session.now,
    );
    session.emit(&prediction, || {
        let mut lines = vec![format!(
            "Prochain repas ({}) : {} (p10 {} / p90 {}), {:.0} ml",
            subject.as_str(),
            clock(prediction.timing.predicted_at),
            clock(prediction.timing.p10),
            clock(prediction.timing.p90),
            prediction.volume.ml
        )];
        for explanation in &prediction.explanations {
            lines.push(format!("  {:<22} {:>18}  {}", explanation.rule, explanation.impact, explanation.text));
        }
        lines.join("\n")
    })
}

fn cmd_sleep(args: &EngineArgs, subject: Subject) -> Result<(), CradleCliError> {
    let session = Session::load(args)?;
    let analysis = session.engine.analyze_sleep(
        subject,
        &session.snapshot.feeds,
        &session.snapshot.sleeps,
        session.now,
    );
    session.emit(&analysis, || {
        let mut lines = vec![format!(
            "Siestes aujourd'hui ({}) : {} ({:.0} min){}",
            subject.as_str(),
            analysis.naps_today,
            analysis.nap_minutes_today,
            if analysis.is_sleeping { ", endormi" } else { "" }
        )];
        match &analysis.next_nap {
            Some(nap) => lines.push(format!("Prochaine sieste : {} ({:?})", clock(nap.at), nap.strategy)),
            None => lines.push("Prochaine sieste : -".to_string()),
        }
        match &analysis.bedtime {
            Some(bedtime) => {
                lines.push(format!(
                    "Coucher : {} (réveil vers {})",
                    clock(bedtime.at),
                    clock(bedtime.expected_wake)
                ));
                for adjustment in &bedtime.adjustments {
                    lines.push(format!("  {} {}", adjustment.impact, adjustment.text));
                }
            }
            None => lines.push("Coucher : -".to_string()),
        }
        lines.join("\n")
    })
}

fn cmd_insights(args: &EngineArgs, subject: Subject, contextual: bool) -> Result<(), CradleCliError> {
    let session = Session::load(args)?;
    let (feeds, sleeps, now) = (&session.snapshot.feeds, &session.snapshot.sleeps, session.now);
    if contextual {
        let insight = session.engine.contextual_insight(subject, feeds, sleeps, now);
        return session.emit(&insight, || {
            insight
                .as_ref()
                .map_or_else(|| "Aucune observation pour ce moment de la journée".to_string(), |i| i.message.clone())
        });
    }
    let insights = session.engine.insights(subject, feeds, sleeps, now);
    session.emit(&insights, || {
        if insights.is_empty() {
            return "Pas encore assez de données".to_string();
        }
        insights
            .iter()
            .map(|i| format!("{}: {}", i.title, i.message))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn cmd_profiles(check: Option<&Path>) -> Result<(), CradleCliError> {
    match check {
        Some(path) => {
            let profiles = ProfileSet::from_json(&fs::read_to_string(path)?)?;
            println!("Profiles valid: {} / {}", profiles.a.name, profiles.b.name);
        }
        None => println!("{}", ProfileSet::default().to_json()?),
    }
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    profiles: Option<&Path>,
    input: Option<&Path>,
    json: bool,
) -> Result<(), CradleCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Cradle Forecast version {}", ENGINE_VERSION),
    });

    if let Some(path) = config {
        checks.push(check_file("config", path, |content| {
            let config = EngineConfig::from_json(content)?;
            Ok(format!("Configuration valid ({} day window)", config.window_days))
        }));
    }

    if let Some(path) = profiles {
        checks.push(check_file("profiles", path, |content| {
            let profiles = ProfileSet::from_json(content)?;
            Ok(format!("Profiles valid ({} / {})", profiles.a.name, profiles.b.name))
        }));
    }

    if let Some(path) = input {
        checks.push(check_file("input", path, |content| {
            let snapshot = Snapshot::parse(content)?;
            Ok(format!(
                "Snapshot valid ({} feeds, {} sleeps)",
                snapshot.feeds.len(),
                snapshot.sleeps.len()
            ))
        }));
    }

    // Check stdin is available (for `-i -`)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass a file with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Cradle Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CradleCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Read and validate one file for the doctor report
fn check_file(
    name: &str,
    path: &Path,
    validate: impl FnOnce(&str) -> Result<String, ComputeError>,
) -> DoctorCheck {
    let (status, message) = if !path.exists() {
        (CheckStatus::Warning, format!("{} does not exist", path.display()))
    } else {
        match fs::read_to_string(path) {
            Ok(content) => match validate(&content) {
                Ok(message) => (CheckStatus::Ok, message),
                Err(e) => (CheckStatus::Error, e.to_string()),
            },
            Err(e) => (CheckStatus::Error, format!("Cannot read {}: {}", path.display(), e)),
        }
    };
    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

// Error types

#[derive(Debug)]
enum CradleCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoInput,
    DoctorFailed,
}

impl From<io::Error> for CradleCliError {
    fn from(e: io::Error) -> Self {
        CradleCliError::Io(e)
    }
}

impl From<ComputeError> for CradleCliError {
    fn from(e: ComputeError) -> Self {
        CradleCliError::Compute(e)
    }
}

impl From<serde_json::Error> for CradleCliError {
    fn from(e: serde_json::Error) -> Self {
        CradleCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CradleCliError> for CliError {
    fn from(e: CradleCliError) -> Self {
        match e {
            CradleCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CradleCliError::Compute(e @ ComputeError::InvalidConfig(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'cradle doctor --config <file>' for details".to_string()),
            },
            CradleCliError::Compute(e @ ComputeError::InvalidTimestamp(_)) => CliError {
                code: "TIMESTAMP_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Use local ISO-8601 time, e.g. 2024-03-10T14:00:00".to_string()),
            },
            CradleCliError::Compute(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input is a snapshot JSON or an NDJSON event log".to_string()),
            },
            CradleCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CradleCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal, nothing to read".to_string(),
                hint: Some("Pipe a snapshot into 'cradle ... -i -' or pass a file path".to_string()),
            },
            CradleCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
