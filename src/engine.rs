//! Engine orchestration
//!
//! This module provides the public API for Cradle Forecast. `ForecastEngine`
//! holds the configuration and both profiles and runs every component over a
//! mixed-subject event snapshot; `forecast_to_json` is the stateless one-shot
//! entry point used by the FFI layer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::accuracy::compute_day_accuracy;
use crate::alerts::{collect_alerts, Alert};
use crate::config::EngineConfig;
use crate::error::ComputeError;
use crate::insights::{compute_insights, contextual_insight, FeedSleepInsight};
use crate::patterns::detect_patterns;
use crate::predictor::FeedPredictor;
use crate::profile::{Profile, ProfileSet};
use crate::recency::within_window;
use crate::sleep::{SleepAnalysis, SleepAnalyzer};
use crate::snapshot::Snapshot;
use crate::sync::{compute_sync_status, SyncStatus};
use crate::types::{DetectedPattern, FeedEvent, Prediction, SleepEvent, Subject, Timestamp};
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Everything forecast for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub subject: Subject,
    pub name: String,
    pub prediction: Prediction,
    pub patterns: Vec<DetectedPattern>,
    pub sleep: SleepAnalysis,
    pub insights: Vec<FeedSleepInsight>,
    pub contextual_insight: Option<FeedSleepInsight>,
    pub day_accuracy: Option<f64>,
}

/// Household-wide report for both subjects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdReport {
    pub producer: String,
    pub engine_version: String,
    pub generated_at: Timestamp,
    pub subjects: Vec<SubjectReport>,
    pub sync: SyncStatus,
    pub alerts: Vec<Alert>,
}

impl HouseholdReport {
    pub fn subject(&self, subject: Subject) -> Option<&SubjectReport> {
        self.subjects.iter().find(|r| r.subject == subject)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(self).map_err(|e| ComputeError::EncodingError(e.to_string()))
    }
}

/// One subject's events pulled out of a mixed snapshot
struct SubjectHistory {
    feeds: Vec<FeedEvent>,
    sleeps: Vec<SleepEvent>,
    sibling_feeds: Vec<FeedEvent>,
}

impl SubjectHistory {
    fn split(subject: Subject, feeds: &[FeedEvent], sleeps: &[SleepEvent]) -> Self {
        let (own, sibling): (Vec<FeedEvent>, Vec<FeedEvent>) =
            feeds.iter().cloned().partition(|f| f.subject == subject);
        Self {
            feeds: own,
            sleeps: sleeps.iter().filter(|s| s.subject == subject).cloned().collect(),
            sibling_feeds: sibling,
        }
    }
}

/// Forecast engine over a fixed configuration and profile set
#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    config: EngineConfig,
    profiles: ProfileSet,
}

impl ForecastEngine {
    pub fn new(config: EngineConfig, profiles: ProfileSet) -> Self {
        Self { config, profiles }
    }

    /// Engine with validated inputs
    pub fn try_new(config: EngineConfig, profiles: ProfileSet) -> Result<Self, ComputeError> {
        config.validate()?;
        profiles.validate()?;
        Ok(Self::new(config, profiles))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn profile(&self, subject: Subject) -> &Profile {
        self.profiles.get(subject)
    }

    pub fn set_profiles(&mut self, profiles: ProfileSet) {
        self.profiles = profiles;
    }

    /// Next feed for `subject`; event lists may mix both subjects
    pub fn predict_next_feed(
        &self,
        subject: Subject,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
    ) -> Prediction {
        let history = SubjectHistory::split(subject, feeds, sleeps);
        FeedPredictor::new(self.profile(subject), &self.config).predict_next_feed(
            &history.feeds,
            &history.sleeps,
            &history.sibling_feeds,
            now,
        )
    }

    pub fn analyze_sleep(
        &self,
        subject: Subject,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
    ) -> SleepAnalysis {
        let history = SubjectHistory::split(subject, feeds, sleeps);
        SleepAnalyzer::new(self.profile(subject), &self.config).analyze(&history.feeds, &history.sleeps, now)
    }

    pub fn detect_patterns(
        &self,
        subject: Subject,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
    ) -> Vec<DetectedPattern> {
        let history = SubjectHistory::split(subject, feeds, sleeps);
        detect_patterns(
            self.profile(subject),
            &self.config,
            &history.feeds,
            &history.sleeps,
            &history.sibling_feeds,
            now,
        )
    }

    pub fn insights(
        &self,
        subject: Subject,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
    ) -> Vec<FeedSleepInsight> {
        let history = SubjectHistory::split(subject, feeds, sleeps);
        compute_insights(&history.feeds, &history.sleeps, &self.config, now)
    }

    pub fn contextual_insight(
        &self,
        subject: Subject,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
    ) -> Option<FeedSleepInsight> {
        let insights = self.insights(subject, feeds, sleeps, now);
        contextual_insight(&insights, now).cloned()
    }

    pub fn day_accuracy(
        &self,
        subject: Subject,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
    ) -> Option<f64> {
        let history = SubjectHistory::split(subject, feeds, sleeps);
        compute_day_accuracy(&history.feeds, &history.sleeps, &self.config, now)
    }

    /// Synchrony of the two subjects' next predicted feeds
    pub fn sync_status(&self, feeds: &[FeedEvent], sleeps: &[SleepEvent], now: Timestamp) -> SyncStatus {
        let a = self.predict_next_feed(Subject::A, feeds, sleeps, now);
        let b = self.predict_next_feed(Subject::B, feeds, sleeps, now);
        self.sync_from_predictions(&a, &b, feeds, now)
    }

    /// `feeds` must be timestamp-ordered; only the analysis window counts toward the sync rate
    fn sync_from_predictions(
        &self,
        a: &Prediction,
        b: &Prediction,
        feeds: &[FeedEvent],
        now: Timestamp,
    ) -> SyncStatus {
        let feeds_a: Vec<FeedEvent> = feeds.iter().filter(|f| f.subject == Subject::A).cloned().collect();
        let feeds_b: Vec<FeedEvent> = feeds.iter().filter(|f| f.subject == Subject::B).cloned().collect();
        compute_sync_status(
            a.timing.predicted_at,
            b.timing.predicted_at,
            within_window(&feeds_a, now, self.config.window_days),
            within_window(&feeds_b, now, self.config.window_days),
            &self.config.sync,
        )
    }

    fn subject_report(&self, subject: Subject, snapshot: &Snapshot, now: Timestamp) -> SubjectReport {
        let profile = self.profile(subject);
        let history = SubjectHistory::split(subject, &snapshot.feeds, &snapshot.sleeps);
        let prediction = FeedPredictor::new(profile, &self.config).predict_next_feed(
            &history.feeds,
            &history.sleeps,
            &history.sibling_feeds,
            now,
        );
        let patterns = detect_patterns(
            profile,
            &self.config,
            &history.feeds,
            &history.sleeps,
            &history.sibling_feeds,
            now,
        );
        let sleep = SleepAnalyzer::new(profile, &self.config).analyze(&history.feeds, &history.sleeps, now);
        let insights = compute_insights(&history.feeds, &history.sleeps, &self.config, now);
        let contextual = contextual_insight(&insights, now).cloned();
        let day_accuracy = compute_day_accuracy(&history.feeds, &history.sleeps, &self.config, now);
        debug!(
            subject = subject.as_str(),
            patterns = patterns.len(),
            insights = insights.len(),
            "subject report built"
        );

        SubjectReport {
            subject,
            name: profile.name.clone(),
            prediction,
            patterns,
            sleep,
            insights,
            contextual_insight: contextual,
            day_accuracy,
        }
    }

    /// Full household report; alerts already dismissed by the caller are left out
    pub fn report(&self, snapshot: &Snapshot, now: Timestamp) -> HouseholdReport {
        let subjects: Vec<SubjectReport> = Subject::ALL
            .iter()
            .map(|s| self.subject_report(*s, snapshot, now))
            .collect();
        let sync = self.sync_from_predictions(
            &subjects[0].prediction,
            &subjects[1].prediction,
            &snapshot.feeds,
            now,
        );

        let mut report = HouseholdReport {
            producer: PRODUCER_NAME.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            generated_at: now,
            subjects,
            sync,
            alerts: Vec::new(),
        };
        let dismissed: HashSet<String> = snapshot.dismissed();
        report.alerts = collect_alerts(&report, &self.config, now, &dismissed);
        info!(
            feeds = snapshot.feeds.len(),
            sleeps = snapshot.sleeps.len(),
            alerts = report.alerts.len(),
            "household report"
        );
        report
    }
}

/// Forecast a JSON snapshot in one call
///
/// Profiles embedded in the snapshot override the defaults.
///
/// # Example
/// ```ignore
/// let report_json = forecast_to_json(&snapshot_json, now)?;
/// ```
pub fn forecast_to_json(snapshot_json: &str, now: Timestamp) -> Result<String, ComputeError> {
    let snapshot = Snapshot::from_json(snapshot_json)?;
    let profiles = snapshot.profiles.clone().unwrap_or_default();
    let engine = ForecastEngine::new(EngineConfig::default(), profiles);
    engine.report(&snapshot, now).to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample_snapshot_json() -> &'static str {
        r#"{
            "feeds": [
                {"id": "a1", "subject": "a", "timestamp": "2024-03-10T07:00:00", "type": "bottle", "volume_ml": 150},
                {"id": "b1", "subject": "b", "timestamp": "2024-03-10T07:20:00", "type": "bottle", "volume_ml": 120},
                {"id": "a2", "subject": "a", "timestamp": "2024-03-10T10:30:00", "type": "bottle", "volume_ml": 140},
                {"id": "b2", "subject": "b", "timestamp": "2024-03-10T10:20:00", "type": "bottle", "volume_ml": 115}
            ],
            "sleeps": [
                {"id": "sa1", "subject": "a", "start": "2024-03-10T08:45:00", "end": "2024-03-10T09:45:00"}
            ]
        }"#
    }

    #[test]
    fn test_forecast_to_json() {
        let json = forecast_to_json(sample_snapshot_json(), at(11, 0)).unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["producer"], PRODUCER_NAME);
        assert_eq!(report["subjects"].as_array().unwrap().len(), 2);
        assert_eq!(report["subjects"][0]["subject"], "a");
        assert_eq!(report["subjects"][1]["subject"], "b");
        assert!(report["sync"]["state"].is_string());
    }

    #[test]
    fn test_subject_filtering() {
        let snapshot = Snapshot::from_json(sample_snapshot_json()).unwrap();
        let engine = ForecastEngine::default();
        let now = at(11, 0);
        let a = engine.predict_next_feed(Subject::A, &snapshot.feeds, &snapshot.sleeps, now);
        let b = engine.predict_next_feed(Subject::B, &snapshot.feeds, &snapshot.sleeps, now);
        assert_eq!(a.subject, Subject::A);
        assert_eq!(b.subject, Subject::B);
        assert!(a.timing.predicted_at >= now);
        assert!(b.timing.predicted_at >= now);

        let sleep_b = engine.analyze_sleep(Subject::B, &snapshot.feeds, &snapshot.sleeps, now);
        assert_eq!(sleep_b.naps_today, 0);
        let sleep_a = engine.analyze_sleep(Subject::A, &snapshot.feeds, &snapshot.sleeps, now);
        assert_eq!(sleep_a.naps_today, 1);
    }

    #[test]
    fn test_report_is_deterministic() {
        let snapshot = Snapshot::from_json(sample_snapshot_json()).unwrap();
        let engine = ForecastEngine::default();
        let first = engine.report(&snapshot, at(11, 0));
        let second = engine.report(&snapshot, at(11, 0));
        assert_eq!(first, second);
        assert_eq!(first.engine_version, ENGINE_VERSION);
    }

    #[test]
    fn test_empty_snapshot_falls_back_to_profiles() {
        let engine = ForecastEngine::default();
        let report = engine.report(&Snapshot::default(), at(11, 0));
        for subject in &report.subjects {
            assert!(subject.prediction.profile_fallback);
            assert_eq!(subject.day_accuracy, None);
        }
        assert_eq!(report.sync.sync_rate, None);
    }

    #[test]
    fn test_sync_rate_ignores_feeds_outside_window() {
        let old = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let feeds = vec![
            FeedEvent::bottle("a-old", Subject::A, old, 120.0),
            FeedEvent::bottle("b-old", Subject::B, old, 120.0),
            FeedEvent::bottle("a-new", Subject::A, at(7, 0), 120.0),
            FeedEvent::bottle("b-new", Subject::B, at(9, 0), 120.0),
        ];
        let engine = ForecastEngine::default();
        // The matched January pair is two months back; only the unmatched March pair counts
        assert_eq!(engine.sync_status(&feeds, &[], at(11, 0)).sync_rate, Some(0.0));
        assert_eq!(engine.sync_status(&feeds[..2], &[], at(11, 0)).sync_rate, None);
    }

    #[test]
    fn test_invalid_snapshot() {
        assert!(forecast_to_json("not valid json", at(11, 0)).is_err());
    }

    #[test]
    fn test_try_new_rejects_bad_config() {
        let config = EngineConfig {
            window_days: 0,
            ..EngineConfig::default()
        };
        assert!(ForecastEngine::try_new(config, ProfileSet::default()).is_err());
    }
}
