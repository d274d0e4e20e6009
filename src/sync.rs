//! Sibling synchrony
//!
//! Compares the two subjects' next predicted feeds, measures how often they
//! have recently eaten together and, when they drift apart, proposes a shared
//! window.

use serde::{Deserialize, Serialize};

use crate::clock::{add_minutes, clock_minutes, minutes_between};
use crate::config::SyncConfig;
use crate::types::{FeedEvent, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synchronized,
    SlightlyOffset,
    Desynchronized,
}

/// Suggested shared feeding window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProposal {
    pub start: Timestamp,
    pub end: Timestamp,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub gap_minutes: f64,
    /// Fraction of recent feeds of `a` matched by a feed of `b`
    pub sync_rate: Option<f64>,
    pub proposal: Option<SyncProposal>,
}

const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

/// A clock-time range where joint feeds work well for the household
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncWindow {
    pub start_minutes: f64,
    pub end_minutes: f64,
    pub label: &'static str,
}

impl SyncWindow {
    /// Distance in minutes from a clock time to the window, 0 inside it
    ///
    /// Measured around the clock, so 00:30 is 90 minutes after a window
    /// ending at 23:00.
    fn distance(&self, minutes: f64) -> f64 {
        [minutes - MINUTES_PER_DAY, minutes, minutes + MINUTES_PER_DAY]
            .into_iter()
            .map(|m| self.linear_distance(m))
            .fold(f64::INFINITY, f64::min)
    }

    fn linear_distance(&self, minutes: f64) -> f64 {
        if minutes < self.start_minutes {
            self.start_minutes - minutes
        } else if minutes > self.end_minutes {
            minutes - self.end_minutes
        } else {
            0.0
        }
    }
}

pub static BEST_SYNC_WINDOWS: &[SyncWindow] = &[
    SyncWindow {
        start_minutes: 6.0 * 60.0 + 30.0,
        end_minutes: 8.0 * 60.0,
        label: "Biberon du réveil",
    },
    SyncWindow {
        start_minutes: 11.0 * 60.0 + 30.0,
        end_minutes: 12.0 * 60.0 + 30.0,
        label: "Avant la sieste de midi",
    },
    SyncWindow {
        start_minutes: 15.0 * 60.0,
        end_minutes: 16.0 * 60.0,
        label: "Goûter",
    },
    SyncWindow {
        start_minutes: 18.0 * 60.0 + 30.0,
        end_minutes: 19.0 * 60.0 + 30.0,
        label: "Avant le coucher",
    },
    SyncWindow {
        start_minutes: 22.0 * 60.0,
        end_minutes: 23.0 * 60.0,
        label: "Dernier biberon du soir",
    },
];

/// Classify a gap between the two predicted feeds
pub fn sync_state(gap_minutes: f64, config: &SyncConfig) -> SyncState {
    let gap = gap_minutes.abs();
    if gap <= config.synchronized_minutes {
        SyncState::Synchronized
    } else if gap <= config.slightly_offset_minutes {
        SyncState::SlightlyOffset
    } else {
        SyncState::Desynchronized
    }
}

pub fn compute_sync_status(
    time_a: Timestamp,
    time_b: Timestamp,
    feeds_a: &[FeedEvent],
    feeds_b: &[FeedEvent],
    config: &SyncConfig,
) -> SyncStatus {
    let gap_minutes = minutes_between(time_a, time_b).abs();
    let state = sync_state(gap_minutes, config);
    let proposal = (state != SyncState::Synchronized).then(|| {
        let (earlier, later) = if time_a <= time_b { (time_a, time_b) } else { (time_b, time_a) };
        let midpoint = add_minutes(earlier, minutes_between(earlier, later) / 2.0);
        SyncProposal {
            start: add_minutes(midpoint, -config.proposal_half_width_minutes),
            end: add_minutes(midpoint, config.proposal_half_width_minutes),
            label: window_label(clock_minutes(midpoint)).to_string(),
        }
    });
    SyncStatus {
        state,
        gap_minutes,
        sync_rate: sync_rate(feeds_a, feeds_b, config),
        proposal,
    }
}

/// Label of the sync window closest to a clock time
fn window_label(minutes: f64) -> &'static str {
    BEST_SYNC_WINDOWS
        .iter()
        .min_by(|x, y| x.distance(minutes).total_cmp(&y.distance(minutes)))
        .map_or("Repas commun", |w| w.label)
}

/// Share of `a`'s most recent feeds that have a `b` feed nearby
///
/// Both lists must be timestamp-ordered. `None` when either side is empty.
pub fn sync_rate(feeds_a: &[FeedEvent], feeds_b: &[FeedEvent], config: &SyncConfig) -> Option<f64> {
    if feeds_a.is_empty() || feeds_b.is_empty() {
        return None;
    }
    let recent = &feeds_a[feeds_a.len().saturating_sub(config.history_feeds)..];
    let matched = recent
        .iter()
        .filter(|feed| {
            let idx = feeds_b.partition_point(|b| b.timestamp < feed.timestamp);
            let before = idx.checked_sub(1).and_then(|i| feeds_b.get(i));
            [before, feeds_b.get(idx)]
                .into_iter()
                .flatten()
                .any(|b| minutes_between(feed.timestamp, b.timestamp).abs() <= config.match_minutes)
        })
        .count();
    Some(matched as f64 / recent.len() as f64)
}
