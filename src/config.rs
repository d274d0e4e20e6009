//! Engine configuration
//!
//! Every tunable constant of the engine lives here. All fields have defaults, so
//! a partial JSON document only overrides what it names.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ComputeError;

/// Default rolling data window in days
pub const DEFAULT_WINDOW_DAYS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Events older than this are ignored by every statistic
    pub window_days: i64,
    /// Samples at most this old get weight 3
    pub recent_days: i64,
    /// Samples at most this old get weight 2
    pub mid_days: i64,
    /// Minimum samples before a data-driven statistic replaces a baseline
    pub min_samples: usize,
    /// Plausible inter-feed interval range (minutes)
    pub min_interval_minutes: f64,
    pub max_interval_minutes: f64,
    /// Floor applied to every forward-chaining step (minutes)
    pub min_step_minutes: f64,
    /// Iteration cap for forward chaining
    pub max_chain_steps: usize,
    /// Last feed older than p90 interval x factor counts as a tracking lapse
    pub stale_interval_factor: f64,
    /// Recency-weighted feed count needed for a high / medium confidence tier
    pub high_confidence_weight: f64,
    pub medium_confidence_weight: f64,
    /// Post-nap rebasing
    pub post_nap_lookback_hours: f64,
    pub post_nap_feed_window_minutes: f64,
    pub default_post_nap_latency_minutes: f64,
    /// Hour at which the household day starts
    pub day_boundary_hour: u32,
    /// Sleeps starting in [nap_start_hour, night_start_hour) are naps
    pub nap_start_hour: u32,
    pub night_start_hour: u32,
    pub patterns: PatternConfig,
    pub sleep: SleepConfig,
    pub insights: InsightConfig,
    pub accuracy: AccuracyConfig,
    pub sync: SyncConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub cluster_window_hours: f64,
    pub cluster_min_feeds: usize,
    pub cluster_timing: f64,
    pub compensation_ratio: f64,
    pub compensation_timing: f64,
    pub evening_timing: f64,
    pub evening_volume: f64,
    pub night_timing: f64,
    pub night_volume: f64,
    pub post_nap_min_nap_minutes: f64,
    pub post_nap_recent_minutes: f64,
    pub post_nap_timing: f64,
    pub post_nap_volume: f64,
    pub growth_recent_hours: f64,
    pub growth_history_days: f64,
    pub growth_ratio: f64,
    pub growth_min_recent: usize,
    pub growth_min_history: usize,
    pub growth_timing: f64,
    pub growth_volume: f64,
    pub desync_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Minimum lead time for a window-based nap prediction
    pub min_nap_lead_minutes: f64,
    pub max_feed_to_nap_minutes: f64,
    pub min_inter_nap_gap_minutes: f64,
    pub max_inter_nap_gap_minutes: f64,
    /// Night sleeps shorter than this are not bedtimes
    pub min_night_minutes: f64,
    pub deficit_threshold_minutes: f64,
    pub deficit_pull_ratio: f64,
    pub max_deficit_pull_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub min_samples: usize,
    pub min_per_side: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyConfig {
    pub feed_tolerance_minutes: f64,
    pub nap_tolerance_minutes: f64,
    pub min_history_samples: usize,
    pub min_today_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub synchronized_minutes: f64,
    pub slightly_offset_minutes: f64,
    pub match_minutes: f64,
    pub history_feeds: usize,
    pub proposal_half_width_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub feed_due_minutes: f64,
    pub bedtime_soon_minutes: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            recent_days: 7,
            mid_days: 21,
            min_samples: 3,
            min_interval_minutes: 30.0,
            max_interval_minutes: 720.0,
            min_step_minutes: 30.0,
            max_chain_steps: 96,
            stale_interval_factor: 1.0,
            high_confidence_weight: 100.0,
            medium_confidence_weight: 40.0,
            post_nap_lookback_hours: 8.0,
            post_nap_feed_window_minutes: 120.0,
            default_post_nap_latency_minutes: 30.0,
            day_boundary_hour: 5,
            nap_start_hour: 6,
            night_start_hour: 19,
            patterns: PatternConfig::default(),
            sleep: SleepConfig::default(),
            insights: InsightConfig::default(),
            accuracy: AccuracyConfig::default(),
            sync: SyncConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            cluster_window_hours: 3.0,
            cluster_min_feeds: 3,
            cluster_timing: 1.30,
            compensation_ratio: 0.70,
            compensation_timing: 0.75,
            evening_timing: 0.85,
            evening_volume: 1.10,
            night_timing: 1.20,
            night_volume: 0.85,
            post_nap_min_nap_minutes: 45.0,
            post_nap_recent_minutes: 30.0,
            post_nap_timing: 0.85,
            post_nap_volume: 1.10,
            growth_recent_hours: 48.0,
            growth_history_days: 14.0,
            growth_ratio: 1.25,
            growth_min_recent: 4,
            growth_min_history: 10,
            growth_timing: 0.80,
            growth_volume: 1.15,
            desync_minutes: 60.0,
        }
    }
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            min_nap_lead_minutes: 15.0,
            max_feed_to_nap_minutes: 180.0,
            min_inter_nap_gap_minutes: 30.0,
            max_inter_nap_gap_minutes: 360.0,
            min_night_minutes: 120.0,
            deficit_threshold_minutes: 30.0,
            deficit_pull_ratio: 0.5,
            max_deficit_pull_minutes: 60.0,
        }
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_per_side: 3,
        }
    }
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            feed_tolerance_minutes: 45.0,
            nap_tolerance_minutes: 20.0,
            min_history_samples: 5,
            min_today_samples: 1,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            synchronized_minutes: 20.0,
            slightly_offset_minutes: 45.0,
            match_minutes: 30.0,
            history_feeds: 20,
            proposal_half_width_minutes: 15.0,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            feed_due_minutes: 15.0,
            bedtime_soon_minutes: 30.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<(), ComputeError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reject values that would break loop guards or window arithmetic
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.window_days <= 0 {
            return Err(ComputeError::InvalidConfig("window_days must be positive".into()));
        }
        if self.recent_days <= 0 || self.mid_days < self.recent_days {
            return Err(ComputeError::InvalidConfig(
                "recency thresholds must satisfy 0 < recent_days <= mid_days".into(),
            ));
        }
        if !(self.min_step_minutes.is_finite() && self.min_step_minutes >= 1.0) {
            return Err(ComputeError::InvalidConfig("min_step_minutes must be >= 1".into()));
        }
        if self.max_chain_steps == 0 {
            return Err(ComputeError::InvalidConfig("max_chain_steps must be positive".into()));
        }
        if self.min_interval_minutes >= self.max_interval_minutes {
            return Err(ComputeError::InvalidConfig(
                "min_interval_minutes must be below max_interval_minutes".into(),
            ));
        }
        if self.day_boundary_hour > 23 || self.nap_start_hour >= self.night_start_hour || self.night_start_hour > 23 {
            return Err(ComputeError::InvalidConfig("invalid day / nap / night hours".into()));
        }
        if self.insights.min_per_side == 0 || self.insights.min_samples < 2 * self.insights.min_per_side - 1 {
            return Err(ComputeError::InvalidConfig(
                "insight sample thresholds are inconsistent".into(),
            ));
        }
        if self.sync.synchronized_minutes > self.sync.slightly_offset_minutes {
            return Err(ComputeError::InvalidConfig(
                "synchronized threshold must not exceed slightly-offset threshold".into(),
            ));
        }
        Ok(())
    }
}
