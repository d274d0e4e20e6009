//! Dismissible alerts derived from a household report
//!
//! The engine keeps no dismissal state. Each alert carries a stable key scoped
//! to its subject and household day; the caller passes back the keys it has
//! already dismissed and those alerts are filtered out.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::clock::{clock_minutes, day_start, format_clock, minutes_between};
use crate::config::EngineConfig;
use crate::engine::HouseholdReport;
use crate::sync::SyncState;
use crate::types::{PatternId, Subject, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FeedDue,
    BedtimeSoon,
    GrowthSpurt,
    SiblingsDesync,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::FeedDue => "feed_due",
            AlertKind::BedtimeSoon => "bedtime_soon",
            AlertKind::GrowthSpurt => "growth_spurt",
            AlertKind::SiblingsDesync => "siblings_desync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub key: String,
    pub kind: AlertKind,
    /// `None` for household-wide alerts
    pub subject: Option<Subject>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<Timestamp>,
}

/// `<kind>:<subject|household>:<YYYY-MM-DD>` for the household day of `now`
pub fn alert_key(kind: AlertKind, subject: Option<Subject>, now: Timestamp, config: &EngineConfig) -> String {
    let scope = subject.map_or("household", |s| s.as_str());
    let day = day_start(now, config.day_boundary_hour).date();
    format!("{}:{}:{}", kind.as_str(), scope, day.format("%Y-%m-%d"))
}

pub fn collect_alerts(
    report: &HouseholdReport,
    config: &EngineConfig,
    now: Timestamp,
    dismissed: &HashSet<String>,
) -> Vec<Alert> {
    let cfg = &config.alerts;
    let mut alerts = Vec::new();
    let mut push = |kind: AlertKind, subject: Option<Subject>, message: String, at: Option<Timestamp>| {
        let key = alert_key(kind, subject, now, config);
        if dismissed.contains(&key) {
            return;
        }
        alerts.push(Alert {
            key,
            kind,
            subject,
            message,
            at,
        });
    };

    for subject in &report.subjects {
        let next_feed = subject.prediction.timing.predicted_at;
        if minutes_between(now, next_feed) <= cfg.feed_due_minutes {
            push(
                AlertKind::FeedDue,
                Some(subject.subject),
                format!("Repas de {} prévu vers {}", subject.name, format_clock(clock_minutes(next_feed))),
                Some(next_feed),
            );
        }
        if let Some(bedtime) = &subject.sleep.bedtime {
            if minutes_between(now, bedtime.at) <= cfg.bedtime_soon_minutes {
                push(
                    AlertKind::BedtimeSoon,
                    Some(subject.subject),
                    format!("Coucher de {} vers {}", subject.name, format_clock(clock_minutes(bedtime.at))),
                    Some(bedtime.at),
                );
            }
        }
        if subject.prediction.patterns.contains(&PatternId::Growth) {
            push(
                AlertKind::GrowthSpurt,
                Some(subject.subject),
                format!("{} semble traverser un pic de croissance", subject.name),
                None,
            );
        }
    }

    if report.sync.state == SyncState::Desynchronized {
        push(
            AlertKind::SiblingsDesync,
            None,
            format!("Repas décalés de {:.0} min", report.sync.gap_minutes),
            report.sync.proposal.as_ref().map(|p| p.start),
        );
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ForecastEngine;
    use crate::snapshot::Snapshot;
    use crate::types::FeedEvent;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_key_uses_household_day() {
        let config = EngineConfig::default();
        assert_eq!(
            alert_key(AlertKind::FeedDue, Some(Subject::A), at(10, 14, 0), &config),
            "feed_due:a:2024-03-10"
        );
        // 03:00 still belongs to the previous household day
        assert_eq!(
            alert_key(AlertKind::SiblingsDesync, None, at(11, 3, 0), &config),
            "siblings_desync:household:2024-03-10"
        );
    }

    /// `a` fed at 10:30, `b` at 12:30: predictions fall far apart
    fn desync_snapshot() -> Snapshot {
        Snapshot {
            feeds: vec![
                FeedEvent::bottle("a1", Subject::A, at(10, 10, 30), 140.0),
                FeedEvent::bottle("b1", Subject::B, at(10, 12, 30), 120.0),
            ],
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_desync_alert_and_dismissal() {
        let engine = ForecastEngine::default();
        let now = at(10, 12, 40);
        let mut snapshot = desync_snapshot();
        let report = engine.report(&snapshot, now);
        assert_eq!(report.sync.state, SyncState::Desynchronized);
        let key = "siblings_desync:household:2024-03-10";
        assert!(report.alerts.iter().any(|a| a.key == key));

        snapshot.dismissed_alerts.push(key.to_string());
        let report = engine.report(&snapshot, now);
        assert!(report.alerts.iter().all(|a| a.key != key));
    }

    #[test]
    fn test_feed_due_alert() {
        let engine = ForecastEngine::default();
        let snapshot = desync_snapshot();
        // Just before a's slot-interval prediction
        let prediction = engine.predict_next_feed(Subject::A, &snapshot.feeds, &[], at(10, 12, 40));
        let now = prediction.timing.predicted_at - chrono::Duration::minutes(10);
        let report = engine.report(&snapshot, now);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.kind == AlertKind::FeedDue && a.subject == Some(Subject::A)));
    }
}
