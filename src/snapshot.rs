//! Snapshot ingest
//!
//! A snapshot is everything the engine needs for one call: both subjects'
//! events, optional profile overrides and the alert keys the caller already
//! dismissed. It comes either as a single JSON document or as an NDJSON event
//! log with one tagged record per line.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ComputeError;
use crate::profile::ProfileSet;
use crate::types::{FeedEvent, SleepEvent, Subject, Timestamped};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub feeds: Vec<FeedEvent>,
    #[serde(default)]
    pub sleeps: Vec<SleepEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<ProfileSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dismissed_alerts: Vec<String>,
}

/// One line of an NDJSON event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogRecord {
    Feed(FeedEvent),
    Sleep(SleepEvent),
    /// Marks an alert key as dismissed
    Dismiss { key: String },
}

impl Snapshot {
    /// Parse and normalize a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let mut snapshot: Snapshot = serde_json::from_str(json)?;
        snapshot.normalize()?;
        Ok(snapshot)
    }

    /// Parse and normalize an NDJSON event log
    pub fn parse_ndjson(ndjson: &str) -> Result<Self, ComputeError> {
        let mut snapshot = Snapshot::default();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let record = serde_json::from_str::<LogRecord>(trimmed).map_err(|e| {
                ComputeError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            match record {
                LogRecord::Feed(feed) => snapshot.feeds.push(feed),
                LogRecord::Sleep(sleep) => snapshot.sleeps.push(sleep),
                LogRecord::Dismiss { key } => snapshot.dismissed_alerts.push(key),
            }
        }
        snapshot.normalize()?;
        Ok(snapshot)
    }

    /// Accept either format, sniffing the first non-blank character
    pub fn parse(input: &str) -> Result<Self, ComputeError> {
        let trimmed = input.trim_start();
        let is_document = trimmed.starts_with('{')
            && serde_json::from_str::<serde_json::Value>(trimmed)
                .map(|v| v.get("event").is_none())
                .unwrap_or(false);
        if is_document {
            Self::from_json(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Validate every event, drop duplicate ids and sort both lists
    pub fn normalize(&mut self) -> Result<(), ComputeError> {
        for feed in &self.feeds {
            feed.validate()?;
        }
        for sleep in &self.sleeps {
            sleep.validate()?;
        }
        if let Some(profiles) = &self.profiles {
            profiles.validate()?;
        }
        dedup_by_id(&mut self.feeds, |f| &f.id, "feed");
        dedup_by_id(&mut self.sleeps, |s| &s.id, "sleep");
        sort_timeline(&mut self.feeds, "feeds");
        sort_timeline(&mut self.sleeps, "sleeps");
        Ok(())
    }

    pub fn feeds_for(&self, subject: Subject) -> Vec<FeedEvent> {
        self.feeds.iter().filter(|f| f.subject == subject).cloned().collect()
    }

    pub fn sleeps_for(&self, subject: Subject) -> Vec<SleepEvent> {
        self.sleeps.iter().filter(|s| s.subject == subject).cloned().collect()
    }

    pub fn dismissed(&self) -> HashSet<String> {
        self.dismissed_alerts.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty() && self.sleeps.is_empty()
    }
}

/// Keep the first event of each id
fn dedup_by_id<T>(events: &mut Vec<T>, id: impl Fn(&T) -> &String, kind: &str) {
    let mut seen = HashSet::new();
    let before = events.len();
    events.retain(|e| seen.insert(id(e).clone()));
    let dropped = before - events.len();
    if dropped > 0 {
        warn!(kind, dropped, "duplicate event ids dropped");
    }
}

fn sort_timeline<T: Timestamped>(events: &mut [T], kind: &str) {
    let ordered = events.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp());
    if !ordered {
        warn!(kind, count = events.len(), "events out of order, sorting");
        events.sort_by_key(|e| e.timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_json_sorts_events() {
        let json = r#"{
            "feeds": [
                {"id": "f2", "subject": "a", "timestamp": "2024-03-10T10:30:00", "type": "bottle", "volume_ml": 140},
                {"id": "f1", "subject": "a", "timestamp": "2024-03-10T07:00:00", "type": "bottle", "volume_ml": 150},
                {"id": "f3", "subject": "b", "timestamp": "2024-03-10T08:00:00", "type": "nursing"}
            ],
            "sleeps": [
                {"id": "s1", "subject": "b", "start": "2024-03-10T09:00:00", "end": "2024-03-10T10:00:00"}
            ],
            "dismissed_alerts": ["feed_due:a:2024-03-10"]
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        let ids: Vec<&str> = snapshot.feeds.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f3", "f2"]);
        assert_eq!(snapshot.feeds_for(Subject::A).len(), 2);
        assert_eq!(snapshot.feeds_for(Subject::B)[0].volume_ml, 0.0);
        assert_eq!(snapshot.sleeps_for(Subject::B).len(), 1);
        assert!(snapshot.dismissed().contains("feed_due:a:2024-03-10"));
        assert!(snapshot.profiles.is_none());
    }

    #[test]
    fn test_ndjson_log() {
        let log = r#"
# exported log
{"event": "feed", "id": "f1", "subject": "a", "timestamp": "2024-03-10T07:00:00", "type": "bottle", "volume_ml": 150}
{"event": "sleep", "id": "s1", "subject": "a", "start": "2024-03-10T09:00:00"}
{"event": "dismiss", "key": "bedtime_soon:a:2024-03-10"}
"#;
        let snapshot = Snapshot::parse(log).unwrap();
        assert_eq!(snapshot.feeds.len(), 1);
        assert!(snapshot.sleeps[0].is_in_progress());
        assert_eq!(snapshot.dismissed_alerts, vec!["bedtime_soon:a:2024-03-10".to_string()]);
    }

    #[test]
    fn test_ndjson_error_reports_line() {
        let log = "{\"event\": \"feed\", \"id\": \"f1\"}\n";
        match Snapshot::parse_ndjson(log) {
            Err(ComputeError::ParseError(msg)) => assert!(msg.contains("line 1")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_events_rejected() {
        let negative = r#"{"feeds": [{"id": "f1", "subject": "a", "timestamp": "2024-03-10T07:00:00", "type": "bottle", "volume_ml": -5}]}"#;
        assert!(matches!(
            Snapshot::from_json(negative),
            Err(ComputeError::InvalidEvent { .. })
        ));

        let backwards = r#"{"sleeps": [{"id": "s1", "subject": "a", "start": "2024-03-10T09:00:00", "end": "2024-03-10T08:00:00"}]}"#;
        assert!(Snapshot::from_json(backwards).is_err());

        let unknown_subject = r#"{"feeds": [{"id": "f1", "subject": "c", "timestamp": "2024-03-10T07:00:00", "type": "bottle"}]}"#;
        assert!(matches!(
            Snapshot::from_json(unknown_subject),
            Err(ComputeError::JsonError(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_dropped() {
        let json = r#"{"feeds": [
            {"id": "f1", "subject": "a", "timestamp": "2024-03-10T07:00:00", "type": "bottle", "volume_ml": 150},
            {"id": "f1", "subject": "a", "timestamp": "2024-03-10T07:00:00", "type": "bottle", "volume_ml": 150}
        ]}"#;
        assert_eq!(Snapshot::from_json(json).unwrap().feeds.len(), 1);
    }
}
