//! Core types for the Cradle Forecast engine
//!
//! This module defines the logged events consumed by the engine and the
//! ephemeral records it produces: detected patterns and feed predictions.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Household-local wall-clock timestamp
pub type Timestamp = NaiveDateTime;

/// One of the two co-tracked infants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    A,
    B,
}

impl Subject {
    pub const ALL: [Subject; 2] = [Subject::A, Subject::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::A => "a",
            Subject::B => "b",
        }
    }

    /// The other subject of the pair
    pub fn sibling(&self) -> Subject {
        match self {
            Subject::A => Subject::B,
            Subject::B => Subject::A,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ComputeError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Subject::A),
            "b" => Ok(Subject::B),
            other => Err(ComputeError::UnknownSubject(other.to_string())),
        }
    }
}

/// How a feed was given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Bottle,
    Nursing,
}

/// Anything positioned on the timeline by a single timestamp
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

/// A logged feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub id: String,
    pub subject: Subject,
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub kind: FeedKind,
    /// Volume in ml (0 when unknown, e.g. nursing)
    #[serde(default)]
    pub volume_ml: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl FeedEvent {
    pub fn bottle(id: impl Into<String>, subject: Subject, timestamp: Timestamp, volume_ml: f64) -> Self {
        Self {
            id: id.into(),
            subject,
            timestamp,
            kind: FeedKind::Bottle,
            volume_ml,
            duration_minutes: None,
            notes: None,
        }
    }

    /// True when the feed carries a usable volume
    pub fn has_volume(&self) -> bool {
        self.volume_ml > 0.0
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.id.trim().is_empty() {
            return Err(ComputeError::InvalidEvent {
                id: "<empty>".to_string(),
                reason: "feed id is empty".to_string(),
            });
        }
        if !self.volume_ml.is_finite() || self.volume_ml < 0.0 {
            return Err(ComputeError::InvalidEvent {
                id: self.id.clone(),
                reason: format!("volume must be a non-negative number, got {}", self.volume_ml),
            });
        }
        if let Some(d) = self.duration_minutes {
            if !d.is_finite() || d < 0.0 {
                return Err(ComputeError::InvalidEvent {
                    id: self.id.clone(),
                    reason: format!("duration must be non-negative, got {d}"),
                });
            }
        }
        Ok(())
    }
}

impl Timestamped for FeedEvent {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// A logged sleep; `end` is absent while the sleep is in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepEvent {
    pub id: String,
    pub subject: Subject,
    pub start: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl SleepEvent {
    pub fn new(id: impl Into<String>, subject: Subject, start: Timestamp, end: Option<Timestamp>) -> Self {
        Self {
            id: id.into(),
            subject,
            start,
            end,
        }
    }

    /// Duration in minutes for completed sleeps
    pub fn duration_minutes(&self) -> Option<f64> {
        self.end
            .map(|end| crate::clock::minutes_between(self.start, end))
    }

    pub fn is_in_progress(&self) -> bool {
        self.end.is_none()
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.id.trim().is_empty() {
            return Err(ComputeError::InvalidEvent {
                id: "<empty>".to_string(),
                reason: "sleep id is empty".to_string(),
            });
        }
        if let Some(end) = self.end {
            if end < self.start {
                return Err(ComputeError::InvalidEvent {
                    id: self.id.clone(),
                    reason: "sleep ends before it starts".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Timestamped for SleepEvent {
    fn timestamp(&self) -> Timestamp {
        self.start
    }
}

/// Fixed time-of-day bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    Morning,
    Midday,
    Afternoon,
    Evening,
    Night,
}

impl SlotId {
    pub const ALL: [SlotId; 5] = [
        SlotId::Morning,
        SlotId::Midday,
        SlotId::Afternoon,
        SlotId::Evening,
        SlotId::Night,
    ];

    /// Slot covering a given hour of the day
    pub fn for_hour(hour: u32) -> SlotId {
        match hour % 24 {
            6..=9 => SlotId::Morning,
            10..=13 => SlotId::Midday,
            14..=17 => SlotId::Afternoon,
            18..=21 => SlotId::Evening,
            _ => SlotId::Night,
        }
    }

    pub fn for_timestamp(ts: Timestamp) -> SlotId {
        Self::for_hour(ts.hour())
    }

    /// Covered hours as `(start, end)`, start inclusive, end exclusive
    pub fn hours(&self) -> (u32, u32) {
        match self {
            SlotId::Morning => (6, 10),
            SlotId::Midday => (10, 14),
            SlotId::Afternoon => (14, 18),
            SlotId::Evening => (18, 22),
            SlotId::Night => (22, 6),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            SlotId::Morning => 0,
            SlotId::Midday => 1,
            SlotId::Afternoon => 2,
            SlotId::Evening => 3,
            SlotId::Night => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotId::Morning => "morning",
            SlotId::Midday => "midday",
            SlotId::Afternoon => "afternoon",
            SlotId::Evening => "evening",
            SlotId::Night => "night",
        }
    }
}

/// Identifier of a short-term behavioral regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternId {
    Cluster,
    Compensation,
    Evening,
    NightLight,
    PostNap,
    Growth,
    Desync,
}

impl PatternId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternId::Cluster => "CLUSTER",
            PatternId::Compensation => "COMPENSATION",
            PatternId::Evening => "EVENING",
            PatternId::NightLight => "NIGHT_LIGHT",
            PatternId::PostNap => "POST_NAP",
            PatternId::Growth => "GROWTH",
            PatternId::Desync => "DESYNC",
        }
    }
}

/// A currently active regime, recomputed on every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: PatternId,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_modifier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_modifier: Option<f64>,
}

/// Quantity an explanation acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactAxis {
    Interval,
    Volume,
    Timing,
}

impl ImpactAxis {
    /// Unit tag shown next to percentage impacts
    pub fn label(&self) -> &'static str {
        match self {
            ImpactAxis::Interval => "intervalle",
            ImpactAxis::Volume => "volume",
            ImpactAxis::Timing => "heure",
        }
    }
}

/// One step of the prediction audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Rule identifier (pattern id or adjustment name)
    pub rule: String,
    /// Human-readable description
    pub text: String,
    /// Display impact, e.g. `-25% intervalle`
    pub impact: String,
    pub axis: ImpactAxis,
    /// Multiplicative factor, or signed minutes for `Timing`
    pub factor: f64,
}

impl Explanation {
    /// Explanation for a multiplicative modifier
    pub fn multiplier(rule: impl Into<String>, text: impl Into<String>, axis: ImpactAxis, factor: f64) -> Self {
        let pct = ((factor - 1.0) * 100.0).round() as i64;
        let impact = if pct >= 0 {
            format!("+{}% {}", pct, axis.label())
        } else {
            format!("{}% {}", pct, axis.label())
        };
        Self {
            rule: rule.into(),
            text: text.into(),
            impact,
            axis,
            factor,
        }
    }

    /// Explanation for a shift of the predicted time, in minutes
    pub fn shift(rule: impl Into<String>, text: impl Into<String>, minutes: f64) -> Self {
        let rounded = minutes.round() as i64;
        let impact = if rounded >= 0 {
            format!("+{} min", rounded)
        } else {
            format!("{} min", rounded)
        };
        Self {
            rule: rule.into(),
            text: text.into(),
            impact,
            axis: ImpactAxis::Timing,
            factor: minutes,
        }
    }
}

/// Confidence tier derived from the amount of recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// Predicted time of the next feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingEstimate {
    pub predicted_at: Timestamp,
    /// Plus/minus minutes around `predicted_at`
    pub confidence_minutes: f64,
    pub p10: Timestamp,
    pub p90: Timestamp,
}

/// Predicted volume of the next feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEstimate {
    pub ml: f64,
    pub confidence_ml: f64,
    pub p10_ml: f64,
    pub p90_ml: f64,
    /// Mean of the resolved slot the volume is clamped around
    pub slot_mean_ml: f64,
}

/// Next-feed forecast for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub subject: Subject,
    pub timing: TimingEstimate,
    pub volume: VolumeEstimate,
    pub explanations: Vec<Explanation>,
    pub confidence: ConfidenceTier,
    pub slot: SlotId,
    pub generated_at: Timestamp,
    /// Set when the prediction comes from static profile data only
    pub profile_fallback: bool,
    #[serde(default)]
    pub patterns: Vec<PatternId>,
}
