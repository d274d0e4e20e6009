//! Cradle Forecast - feeding and sleep forecasting for two co-tracked infants
//!
//! The engine turns a household's logged feeds and sleeps into deterministic
//! forecasts: recency-weighted slot statistics → pattern detection → next feed
//! (time + volume) → next nap and bedtime, plus accuracy scoring, feed/sleep
//! insights, sibling synchrony and dismissible alerts.
//!
//! ## Modules
//!
//! - **Forecasting**: `slots`, `patterns`, `predictor`, `sleep`
//! - **Retrospective**: `accuracy`, `insights`, `sync`, `alerts`
//! - **Surfaces**: `engine` (Rust API and JSON entry point), `ffi` (C ABI)

pub mod accuracy;
pub mod alerts;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod insights;
pub mod patterns;
pub mod predictor;
pub mod profile;
pub mod recency;
pub mod sleep;
pub mod slots;
pub mod snapshot;
pub mod sync;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use accuracy::compute_day_accuracy;
pub use alerts::{collect_alerts, Alert, AlertKind};
pub use config::EngineConfig;
pub use engine::{forecast_to_json, ForecastEngine, HouseholdReport, SubjectReport};
pub use error::ComputeError;
pub use insights::{compute_insights, contextual_insight, FeedSleepInsight};
pub use patterns::detect_patterns;
pub use predictor::FeedPredictor;
pub use profile::{Profile, ProfileSet};
pub use sleep::{SleepAnalysis, SleepAnalyzer};
pub use snapshot::Snapshot;
pub use sync::{compute_sync_status, SyncState, SyncStatus};
pub use types::{FeedEvent, Prediction, SleepEvent, SlotId, Subject, Timestamp};

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "cradle-forecast";
