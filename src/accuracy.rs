//! Retrospective accuracy of the day
//!
//! Compares today's observed feed intervals and nap lengths with the historical
//! medians. The score is the fraction of today's samples that landed within
//! tolerance, pooled across the dimensions that have enough data.

use tracing::debug;

use crate::clock::{day_start, minutes_between};
use crate::config::EngineConfig;
use crate::recency::{median, within_window};
use crate::sleep::is_nap;
use crate::types::{FeedEvent, SleepEvent, Timestamp};

/// One scored dimension
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dimension {
    hits: usize,
    samples: usize,
}

/// Score in `[0, 1]`, or `None` when no dimension has enough data
pub fn compute_day_accuracy(
    feeds: &[FeedEvent],
    sleeps: &[SleepEvent],
    config: &EngineConfig,
    now: Timestamp,
) -> Option<f64> {
    let feeds = within_window(feeds, now, config.window_days);
    let sleeps = within_window(sleeps, now, config.window_days);
    let today = day_start(now, config.day_boundary_hour);

    let dimensions = [
        feed_dimension(feeds, config, today),
        nap_dimension(sleeps, config, today, now),
    ];
    let (hits, samples) = dimensions
        .iter()
        .flatten()
        .fold((0, 0), |(h, s), d| (h + d.hits, s + d.samples));
    if samples == 0 {
        debug!("day accuracy unavailable");
        return None;
    }
    Some(hits as f64 / samples as f64)
}

fn feed_dimension(feeds: &[FeedEvent], config: &EngineConfig, today: Timestamp) -> Option<Dimension> {
    let split = feeds.partition_point(|f| f.timestamp < today);
    let plausible = |pair: &[FeedEvent]| {
        let gap = minutes_between(pair[0].timestamp, pair[1].timestamp);
        (gap >= config.min_interval_minutes && gap <= config.max_interval_minutes).then_some(gap)
    };
    let history: Vec<f64> = feeds[..split].windows(2).filter_map(plausible).collect();
    let observed: Vec<f64> = feeds[split..].windows(2).filter_map(plausible).collect();
    score(&history, &observed, config.accuracy.feed_tolerance_minutes, config)
}

fn nap_dimension(
    sleeps: &[SleepEvent],
    config: &EngineConfig,
    today: Timestamp,
    now: Timestamp,
) -> Option<Dimension> {
    let mut history = Vec::new();
    let mut observed = Vec::new();
    for nap in sleeps.iter().filter(|s| is_nap(s, config)) {
        let Some(end) = nap.end.filter(|end| *end <= now) else {
            continue;
        };
        let length = minutes_between(nap.start, end);
        if nap.start < today {
            history.push(length);
        } else {
            observed.push(length);
        }
    }
    score(&history, &observed, config.accuracy.nap_tolerance_minutes, config)
}

fn score(history: &[f64], observed: &[f64], tolerance: f64, config: &EngineConfig) -> Option<Dimension> {
    let cfg = &config.accuracy;
    if history.len() < cfg.min_history_samples || observed.len() < cfg.min_today_samples {
        return None;
    }
    let expected = median(history);
    let hits = observed
        .iter()
        .filter(|v| (*v - expected).abs() <= tolerance)
        .count();
    Some(Dimension {
        hits,
        samples: observed.len(),
    })
}
