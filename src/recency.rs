//! Recency weighting
//!
//! Every aggregate in the engine is biased toward recent behavior: samples from
//! the last week count three times, the last three weeks twice, older ones once.
//! Events outside the rolling window never reach a statistic.

use chrono::Duration;

use crate::clock::minutes_between;
use crate::config::EngineConfig;
use crate::types::{Timestamp, Timestamped};

/// A value with its weight
pub type Weighted = (f64, f64);

/// Weight of a sample observed at `ts`, using the default 7 / 21 day tiers
pub fn recency_weight(ts: Timestamp, now: Timestamp) -> f64 {
    recency_weight_with(ts, now, 7, 21)
}

/// Weight of a sample observed at `ts` with explicit tier boundaries (days)
pub fn recency_weight_with(ts: Timestamp, now: Timestamp, recent_days: i64, mid_days: i64) -> f64 {
    let age_days = minutes_between(ts, now) / (24.0 * 60.0);
    if age_days <= recent_days as f64 {
        3.0
    } else if age_days <= mid_days as f64 {
        2.0
    } else {
        1.0
    }
}

/// Weight of a sample according to the engine configuration
pub fn config_weight(config: &EngineConfig, ts: Timestamp, now: Timestamp) -> f64 {
    recency_weight_with(ts, now, config.recent_days, config.mid_days)
}

/// Weighted median of `(value, weight)` pairs; 0 for empty input
pub fn weighted_median(samples: &[Weighted]) -> f64 {
    let mut sorted: Vec<Weighted> = samples
        .iter()
        .copied()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    let half = total / 2.0;
    let mut cumulative = 0.0;
    for (value, weight) in &sorted {
        cumulative += weight;
        if cumulative >= half {
            return *value;
        }
    }
    sorted[sorted.len() - 1].0
}

/// Weighted arithmetic mean; 0 for empty input
pub fn weighted_avg(samples: &[Weighted]) -> f64 {
    let (sum, total) = samples
        .iter()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .fold((0.0, 0.0), |(s, t), (v, w)| (s + v * w, t + w));
    if total <= 0.0 {
        return 0.0;
    }
    sum / total
}

/// Weighted standard deviation around the weighted mean; 0 for empty input
pub fn weighted_std(samples: &[Weighted]) -> f64 {
    let mean = weighted_avg(samples);
    let (sum, total) = samples
        .iter()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .fold((0.0, 0.0), |(s, t), (v, w)| (s + w * (v - mean).powi(2), t + w));
    if total <= 0.0 {
        return 0.0;
    }
    (sum / total).sqrt()
}

/// Plain (unweighted) median; 0 for empty input
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sub-slice of a timestamp-ordered list inside `(now - window_days, now]`
pub fn within_window<T: Timestamped>(events: &[T], now: Timestamp, window_days: i64) -> &[T] {
    let cutoff = now - Duration::days(window_days);
    let lo = events.partition_point(|e| e.timestamp() <= cutoff);
    let hi = events.partition_point(|e| e.timestamp() <= now);
    if lo >= hi {
        return &[];
    }
    &events[lo..hi]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedEvent, Subject};
    use chrono::NaiveDate;

    fn day(d: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + Duration::days(d as i64 - 1)
    }

    #[test]
    fn test_weight_tiers() {
        let now = day(60);
        assert_eq!(recency_weight(day(60), now), 3.0);
        assert_eq!(recency_weight(day(53), now), 3.0);
        assert_eq!(recency_weight(day(52), now), 2.0);
        assert_eq!(recency_weight(day(39), now), 2.0);
        assert_eq!(recency_weight(day(38), now), 1.0);
    }

    #[test]
    fn test_recent_never_lighter_than_older() {
        let now = day(60);
        for newer in 1..=60u32 {
            for older in 1..=newer {
                assert!(recency_weight(day(newer), now) >= recency_weight(day(older), now));
            }
        }
    }

    #[test]
    fn test_weighted_median() {
        assert_eq!(weighted_median(&[]), 0.0);
        assert_eq!(weighted_median(&[(10.0, 1.0), (20.0, 1.0), (30.0, 1.0)]), 20.0);
        // Heavy recent sample pulls the median toward it
        assert_eq!(weighted_median(&[(10.0, 1.0), (20.0, 1.0), (100.0, 3.0)]), 100.0);
    }

    #[test]
    fn test_weighted_avg_and_std() {
        assert_eq!(weighted_avg(&[]), 0.0);
        let avg = weighted_avg(&[(100.0, 3.0), (200.0, 1.0)]);
        assert!((avg - 125.0).abs() < 1e-9);
        assert_eq!(weighted_std(&[(50.0, 2.0), (50.0, 1.0)]), 0.0);
        assert!(weighted_std(&[(0.0, 1.0), (10.0, 1.0)]) > 4.9);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn test_within_window_drops_old_and_future() {
        let feeds: Vec<FeedEvent> = [1u32, 10, 40, 59, 61]
            .iter()
            .map(|d| FeedEvent::bottle(format!("f{d}"), Subject::A, day(*d), 100.0))
            .collect();
        let kept = within_window(&feeds, day(60), 30);
        let ids: Vec<&str> = kept.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f40", "f59"]);
        assert!(within_window(&feeds, day(0), 30).is_empty());
    }
}
