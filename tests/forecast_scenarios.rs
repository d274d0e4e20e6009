//! End-to-end forecasting scenarios through the public engine API

use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;

use cradle_forecast::sleep::NapStrategy;
use cradle_forecast::types::{FeedKind, PatternId};
use cradle_forecast::{
    compute_day_accuracy, compute_sync_status, EngineConfig, FeedEvent, ForecastEngine, SleepEvent, Snapshot,
    Subject, SyncState, Timestamp,
};

fn at(d: u32, h: u32, m: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 3, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn feed(subject: Subject, ts: Timestamp, ml: f64) -> FeedEvent {
    FeedEvent::bottle(format!("{}-{ts}", subject.as_str()), subject, ts, ml)
}

fn sleep(subject: Subject, start: Timestamp, end: Timestamp) -> SleepEvent {
    SleepEvent::new(format!("{}-s-{start}", subject.as_str()), subject, start, Some(end))
}

/// Three weeks of a regular household as logged up to `now`
fn regular_household(now: Timestamp) -> Snapshot {
    let mut feeds = Vec::new();
    let mut sleeps = Vec::new();
    for d in 1..=20 {
        for (h, m, ml) in [(6, 30, 150.0), (9, 45, 130.0), (13, 0, 125.0), (16, 15, 120.0), (19, 15, 150.0), (23, 0, 110.0)] {
            feeds.push(feed(Subject::A, at(d, h, m), ml));
            feeds.push(feed(Subject::B, at(d, h, m) + Duration::minutes(10), ml - 15.0));
        }
        sleeps.push(sleep(Subject::A, at(d, 10, 30), at(d, 11, 45)));
        sleeps.push(sleep(Subject::A, at(d, 14, 0), at(d, 15, 30)));
        sleeps.push(sleep(Subject::A, at(d, 19, 45), at(d + 1, 6, 15)));
    }
    feeds.retain(|f| f.timestamp <= now);
    sleeps.retain(|s| s.start <= now);
    for s in &mut sleeps {
        if s.end.is_some_and(|end| end > now) {
            s.end = None;
        }
    }
    let mut snapshot = Snapshot {
        feeds,
        sleeps,
        ..Snapshot::default()
    };
    snapshot.normalize().unwrap();
    snapshot
}

#[test]
fn zero_history_uses_profile_fallback() {
    let engine = ForecastEngine::default();
    let now = at(10, 11, 20);
    let prediction = engine.predict_next_feed(Subject::A, &[], &[], now);
    assert!(prediction.profile_fallback);
    assert!(prediction.timing.predicted_at >= now);
    assert_eq!(
        prediction.explanations.first().map(|e| e.rule.as_str()),
        Some("PROFILE_FALLBACK")
    );
}

#[test]
fn compensation_scenario_pulls_feed_earlier() {
    let engine = ForecastEngine::default();
    let feeds = vec![
        feed(Subject::A, at(10, 7, 0), 150.0),
        feed(Subject::A, at(10, 10, 30), 140.0),
        feed(Subject::A, at(10, 14, 0), 50.0),
    ];
    let now = at(10, 14, 10);
    let prediction = engine.predict_next_feed(Subject::A, &feeds, &[], now);

    assert!(prediction.patterns.contains(&PatternId::Compensation));
    let compensation = prediction
        .explanations
        .iter()
        .find(|e| e.rule == "COMPENSATION")
        .expect("compensation explanation");
    assert_eq!(compensation.impact, "-25% intervalle");

    // Interval-only baseline: 14:00 + 200 min afternoon slot interval
    let baseline = at(10, 17, 20);
    assert!(prediction.timing.predicted_at < baseline);
    assert_eq!(prediction.timing.predicted_at, at(10, 16, 30));
}

#[test]
fn cluster_feeding_detected() {
    let engine = ForecastEngine::default();
    let feeds = vec![
        feed(Subject::A, at(10, 11, 0), 60.0),
        feed(Subject::A, at(10, 12, 0), 60.0),
        feed(Subject::A, at(10, 13, 0), 60.0),
        feed(Subject::A, at(10, 13, 45), 60.0),
    ];
    let patterns = engine.detect_patterns(Subject::A, &feeds, &[], at(10, 14, 0));
    let cluster = patterns
        .iter()
        .find(|p| p.id == PatternId::Cluster)
        .expect("cluster active");
    assert_eq!(cluster.timing_modifier, Some(1.30));
}

#[test]
fn post_nap_rebasing() {
    let engine = ForecastEngine::default();
    let mut feeds = Vec::new();
    let mut sleeps = Vec::new();
    for d in 7..=9 {
        feeds.push(feed(Subject::A, at(d, 10, 0), 120.0));
        sleeps.push(sleep(Subject::A, at(d, 12, 10), at(d, 13, 0)));
        feeds.push(feed(Subject::A, at(d, 13, 20), 130.0));
    }
    feeds.push(feed(Subject::A, at(10, 10, 0), 120.0));
    sleeps.push(sleep(Subject::A, at(10, 12, 10), at(10, 13, 0)));

    let prediction = engine.predict_next_feed(Subject::A, &feeds, &sleeps, at(10, 13, 5));
    assert_eq!(prediction.timing.predicted_at, at(10, 13, 20));
    assert!(prediction.explanations.iter().any(|e| e.rule == "POST_NAP_REBASE"));
}

#[test]
fn predictions_never_in_the_past_and_volume_bounded() {
    let engine = ForecastEngine::default();
    let mut now = at(20, 0, 5);
    while now < at(21, 12, 0) {
        let snapshot = regular_household(now);
        for subject in Subject::ALL {
            let p = engine.predict_next_feed(subject, &snapshot.feeds, &snapshot.sleeps, now);
            assert!(p.timing.predicted_at >= now, "{subject:?} predicted in the past at {now}");
            let mean = p.volume.slot_mean_ml;
            assert!(p.volume.ml >= 0.5 * mean - 1e-9 && p.volume.ml <= 1.5 * mean + 1e-9);
        }
        now += Duration::minutes(37);
    }
}

#[test]
fn regular_history_gives_confident_data_driven_forecast() {
    let engine = ForecastEngine::default();
    let now = at(20, 14, 30);
    let snapshot = regular_household(now);
    let report = engine.report(&snapshot, now);

    let a = report.subject(Subject::A).unwrap();
    assert!(!a.prediction.profile_fallback);
    assert_eq!(a.sleep.naps_today, 1);
    assert!(a.sleep.is_sleeping);
    // b always follows a within ten minutes
    assert_eq!(report.sync.sync_rate, Some(1.0));
}

#[test]
fn nap_strategy_falls_back_to_default_windows() {
    let engine = ForecastEngine::default();
    let analysis = engine.analyze_sleep(Subject::B, &[], &[], at(10, 8, 0));
    let nap = analysis.next_nap.unwrap();
    assert_eq!(nap.strategy, NapStrategy::DefaultWindow);
    assert!(nap.at > at(10, 8, 0));
}

#[test]
fn accuracy_requires_history_and_today() {
    let config = EngineConfig::default();
    let history: Vec<FeedEvent> = (0..7)
        .map(|i| feed(Subject::A, at(8, 6, 0) + Duration::minutes(180 * i), 120.0))
        .collect();
    assert_eq!(compute_day_accuracy(&history, &[], &config, at(10, 12, 0)), None);

    let mut with_today = history.clone();
    with_today.push(feed(Subject::A, at(10, 6, 0), 120.0));
    with_today.push(feed(Subject::A, at(10, 9, 10), 120.0));
    assert_eq!(compute_day_accuracy(&with_today, &[], &config, at(10, 12, 0)), Some(1.0));
}

#[test]
fn sync_thresholds() {
    let config = EngineConfig::default();
    let base = at(10, 14, 0);
    let state = |gap: i64| compute_sync_status(base, base + Duration::minutes(gap), &[], &[], &config.sync).state;
    assert_eq!(state(15), SyncState::Synchronized);
    assert_eq!(state(30), SyncState::SlightlyOffset);
    assert_eq!(state(90), SyncState::Desynchronized);
}

#[test]
fn pattern_detection_is_pure() {
    let engine = ForecastEngine::default();
    let now = at(20, 20, 0);
    let snapshot = regular_household(now);
    let first = engine.detect_patterns(Subject::A, &snapshot.feeds, &snapshot.sleeps, now);
    let second = engine.detect_patterns(Subject::A, &snapshot.feeds, &snapshot.sleeps, now);
    assert_eq!(first, second);
}

#[test]
fn nursing_feeds_do_not_skew_volume() {
    let engine = ForecastEngine::default();
    let mut feeds: Vec<FeedEvent> = Vec::new();
    for d in 7..=9 {
        feeds.push(feed(Subject::B, at(d, 14, 30), 110.0));
        let mut nursing = feed(Subject::B, at(d, 17, 30), 0.0);
        nursing.kind = FeedKind::Nursing;
        feeds.push(nursing);
    }
    let prediction = engine.predict_next_feed(Subject::B, &feeds, &[], at(10, 15, 0));
    assert!(prediction.volume.ml > 0.0);
}
