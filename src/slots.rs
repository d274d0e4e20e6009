//! Time-of-day slot model
//!
//! Each slot starts from its static profile baseline. Once enough history
//! accumulates inside the slot, the data-driven statistic replaces it. Every
//! interval and volume lookup made by the predictor goes through this module.

use std::collections::HashMap;

use crate::clock::minutes_between;
use crate::config::EngineConfig;
use crate::profile::Profile;
use crate::recency::{config_weight, weighted_avg, weighted_median, weighted_std, Weighted};
use crate::types::{FeedEvent, SlotId, Timestamp};

/// A slot statistic together with its provenance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotStat {
    pub value: f64,
    /// Spread used for confidence bounds
    pub spread: f64,
    pub samples: usize,
    /// False when the static baseline was used
    pub data_driven: bool,
}

/// Slot statistics for one subject
#[derive(Debug, Clone, Copy)]
pub struct SlotModel<'a> {
    profile: &'a Profile,
    config: &'a EngineConfig,
}

impl<'a> SlotModel<'a> {
    pub fn new(profile: &'a Profile, config: &'a EngineConfig) -> Self {
        Self { profile, config }
    }

    pub fn profile(&self) -> &'a Profile {
        self.profile
    }

    /// Plausible intervals keyed by the slot of the preceding feed
    ///
    /// `feeds` must already be windowed and timestamp-ordered.
    pub fn interval_samples(&self, feeds: &[FeedEvent], now: Timestamp) -> Vec<(SlotId, Weighted)> {
        feeds
            .windows(2)
            .filter_map(|pair| {
                let gap = minutes_between(pair[0].timestamp, pair[1].timestamp);
                if gap < self.config.min_interval_minutes || gap > self.config.max_interval_minutes {
                    return None;
                }
                let weight = config_weight(self.config, pair[0].timestamp, now);
                Some((SlotId::for_hour(pair[0].hour()), (gap, weight)))
            })
            .collect()
    }

    /// Typical interval after a feed in `slot`
    pub fn compute_slot_interval(&self, feeds: &[FeedEvent], slot: SlotId, now: Timestamp) -> SlotStat {
        let samples: Vec<Weighted> = self
            .interval_samples(feeds, now)
            .into_iter()
            .filter(|(s, _)| *s == slot)
            .map(|(_, w)| w)
            .collect();
        let baseline = self.profile.slot(slot);
        if samples.len() < self.config.min_samples {
            return SlotStat {
                value: baseline.interval_minutes,
                spread: baseline.interval_std_minutes,
                samples: samples.len(),
                data_driven: false,
            };
        }
        SlotStat {
            value: weighted_median(&samples),
            spread: weighted_std(&samples),
            samples: samples.len(),
            data_driven: true,
        }
    }

    /// Typical volume of a feed taken in `slot`
    pub fn compute_slot_volume(&self, feeds: &[FeedEvent], slot: SlotId, now: Timestamp) -> SlotStat {
        let samples: Vec<Weighted> = feeds
            .iter()
            .filter(|f| f.has_volume() && SlotId::for_hour(f.hour()) == slot)
            .map(|f| (f.volume_ml, config_weight(self.config, f.timestamp, now)))
            .collect();
        let baseline = self.profile.slot(slot);
        if samples.len() < self.config.min_samples {
            return SlotStat {
                value: baseline.mean_volume_ml,
                spread: baseline.std_volume_ml,
                samples: samples.len(),
                data_driven: false,
            };
        }
        SlotStat {
            value: weighted_avg(&samples),
            spread: weighted_std(&samples),
            samples: samples.len(),
            data_driven: true,
        }
    }

    /// Weighted median interval across all slots
    pub fn median_interval(&self, feeds: &[FeedEvent], now: Timestamp) -> f64 {
        let samples: Vec<Weighted> = self
            .interval_samples(feeds, now)
            .into_iter()
            .map(|(_, w)| w)
            .collect();
        if samples.len() < self.config.min_samples {
            return self.profile.interval.median;
        }
        weighted_median(&samples)
    }
}

/// Per-call memoization of slot statistics
///
/// Lives for a single prediction and is dropped with it.
pub struct SlotCache<'a> {
    model: SlotModel<'a>,
    feeds: &'a [FeedEvent],
    now: Timestamp,
    intervals: HashMap<SlotId, SlotStat>,
    volumes: HashMap<SlotId, SlotStat>,
    median: Option<f64>,
}

impl<'a> SlotCache<'a> {
    pub fn new(model: SlotModel<'a>, feeds: &'a [FeedEvent], now: Timestamp) -> Self {
        Self {
            model,
            feeds,
            now,
            intervals: HashMap::new(),
            volumes: HashMap::new(),
            median: None,
        }
    }

    pub fn interval(&mut self, slot: SlotId) -> SlotStat {
        let (model, feeds, now) = (self.model, self.feeds, self.now);
        *self
            .intervals
            .entry(slot)
            .or_insert_with(|| model.compute_slot_interval(feeds, slot, now))
    }

    pub fn volume(&mut self, slot: SlotId) -> SlotStat {
        let (model, feeds, now) = (self.model, self.feeds, self.now);
        *self
            .volumes
            .entry(slot)
            .or_insert_with(|| model.compute_slot_volume(feeds, slot, now))
    }

    pub fn median_interval(&mut self) -> f64 {
        if let Some(m) = self.median {
            return m;
        }
        let m = self.model.median_interval(self.feeds, self.now);
        self.median = Some(m);
        m
    }
}
