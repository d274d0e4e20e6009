//! Short-term pattern detection
//!
//! Scans a subject's recent history for behavioral regimes that should bend the
//! next prediction. The catalog is a static table of rules; each rule pairs a
//! detector with the multiplicative effect it carries. Detection is stateless
//! and re-derived on every call.

use chrono::{Duration, Timelike};

use crate::clock::minutes_between;
use crate::config::{EngineConfig, PatternConfig};
use crate::profile::Profile;
use crate::recency::within_window;
use crate::sleep::is_nap;
use crate::slots::SlotModel;
use crate::types::{DetectedPattern, FeedEvent, PatternId, SleepEvent, SlotId, Timestamp};

/// Inputs visible to every detector
pub struct PatternContext<'a> {
    pub profile: &'a Profile,
    pub config: &'a EngineConfig,
    /// Subject's windowed feeds
    pub feeds: &'a [FeedEvent],
    pub sleeps: &'a [SleepEvent],
    /// Sibling's windowed feeds
    pub sibling_feeds: &'a [FeedEvent],
    pub now: Timestamp,
}

/// Timing and volume multipliers of a rule
type Effect = (Option<f64>, Option<f64>);

struct PatternRule {
    id: PatternId,
    effect: fn(&PatternConfig) -> Effect,
    /// Returns the description when the regime is active
    detect: fn(&PatternContext<'_>) -> Option<String>,
}

static RULES: &[PatternRule] = &[
    PatternRule {
        id: PatternId::Cluster,
        effect: |c| (Some(c.cluster_timing), None),
        detect: detect_cluster,
    },
    PatternRule {
        id: PatternId::Compensation,
        effect: |c| (Some(c.compensation_timing), None),
        detect: detect_compensation,
    },
    PatternRule {
        id: PatternId::Evening,
        effect: |c| (Some(c.evening_timing), Some(c.evening_volume)),
        detect: detect_evening,
    },
    PatternRule {
        id: PatternId::NightLight,
        effect: |c| (Some(c.night_timing), Some(c.night_volume)),
        detect: detect_night,
    },
    PatternRule {
        id: PatternId::PostNap,
        effect: |c| (Some(c.post_nap_timing), Some(c.post_nap_volume)),
        detect: detect_post_nap,
    },
    PatternRule {
        id: PatternId::Growth,
        effect: |c| (Some(c.growth_timing), Some(c.growth_volume)),
        detect: detect_growth,
    },
    PatternRule {
        id: PatternId::Desync,
        effect: |_| (None, None),
        detect: detect_desync,
    },
];

/// Active regimes for a subject, in catalog order
pub fn detect_patterns(
    profile: &Profile,
    config: &EngineConfig,
    feeds: &[FeedEvent],
    sleeps: &[SleepEvent],
    sibling_feeds: &[FeedEvent],
    now: Timestamp,
) -> Vec<DetectedPattern> {
    let ctx = PatternContext {
        profile,
        config,
        feeds: within_window(feeds, now, config.window_days),
        sleeps: within_window(sleeps, now, config.window_days),
        sibling_feeds: within_window(sibling_feeds, now, config.window_days),
        now,
    };
    detect_in_context(&ctx)
}

/// Run the catalog against an already-windowed context
pub fn detect_in_context(ctx: &PatternContext<'_>) -> Vec<DetectedPattern> {
    RULES
        .iter()
        .filter_map(|rule| {
            let description = (rule.detect)(ctx)?;
            let (timing_modifier, volume_modifier) = (rule.effect)(&ctx.config.patterns);
            tracing::debug!(pattern = rule.id.as_str(), "pattern active");
            Some(DetectedPattern {
                id: rule.id,
                description,
                timing_modifier,
                volume_modifier,
            })
        })
        .collect()
}

fn detect_cluster(ctx: &PatternContext<'_>) -> Option<String> {
    let cfg = &ctx.config.patterns;
    let since = ctx.now - Duration::minutes((cfg.cluster_window_hours * 60.0).round() as i64);
    let count = ctx
        .feeds
        .iter()
        .filter(|f| f.timestamp > since && f.timestamp <= ctx.now)
        .count();
    (count >= cfg.cluster_min_feeds).then(|| {
        format!(
            "Repas groupés : {} repas sur les {} dernières heures",
            count, cfg.cluster_window_hours
        )
    })
}

fn detect_compensation(ctx: &PatternContext<'_>) -> Option<String> {
    let last = ctx.feeds.last().filter(|f| f.has_volume())?;
    let slot = SlotId::for_hour(last.hour());
    let slot_mean = SlotModel::new(ctx.profile, ctx.config)
        .compute_slot_volume(ctx.feeds, slot, ctx.now)
        .value;
    if slot_mean <= 0.0 {
        return None;
    }
    let ratio = last.volume_ml / slot_mean;
    (ratio < ctx.config.patterns.compensation_ratio).then(|| {
        format!(
            "Dernier repas écourté ({:.0} ml, {:.0}% de la moyenne du créneau)",
            last.volume_ml,
            ratio * 100.0
        )
    })
}

fn detect_evening(ctx: &PatternContext<'_>) -> Option<String> {
    (18..22)
        .contains(&ctx.now.hour())
        .then(|| "Soirée : repas plus rapprochés et plus copieux".to_string())
}

fn detect_night(ctx: &PatternContext<'_>) -> Option<String> {
    let hour = ctx.now.hour();
    (hour >= 22 || hour < 6).then(|| "Nuit : repas espacés et plus légers".to_string())
}

fn detect_post_nap(ctx: &PatternContext<'_>) -> Option<String> {
    let cfg = &ctx.config.patterns;
    let nap = ctx
        .sleeps
        .iter()
        .rev()
        .filter(|s| is_nap(s, ctx.config))
        .find(|s| matches!(s.end, Some(end) if end <= ctx.now))?;
    let end = nap.end?;
    let length = nap.duration_minutes()?;
    let since = minutes_between(end, ctx.now);
    (length >= cfg.post_nap_min_nap_minutes && since <= cfg.post_nap_recent_minutes).then(|| {
        format!(
            "Réveil de sieste ({:.0} min) il y a {:.0} min",
            length, since
        )
    })
}

fn detect_growth(ctx: &PatternContext<'_>) -> Option<String> {
    let cfg = &ctx.config.patterns;
    let recent_since = ctx.now - Duration::minutes((cfg.growth_recent_hours * 60.0).round() as i64);
    let history_since = ctx.now - Duration::minutes((cfg.growth_history_days * 24.0 * 60.0).round() as i64);

    let (mut recent, mut history) = (Vec::new(), Vec::new());
    for f in ctx.feeds.iter().filter(|f| f.has_volume()) {
        if f.timestamp >= recent_since {
            recent.push(f.volume_ml);
        } else if f.timestamp >= history_since {
            history.push(f.volume_ml);
        }
    }
    if recent.len() < cfg.growth_min_recent || history.len() < cfg.growth_min_history {
        return None;
    }
    let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
    let history_avg = history.iter().sum::<f64>() / history.len() as f64;
    if history_avg <= 0.0 {
        return None;
    }
    let ratio = recent_avg / history_avg;
    (ratio > cfg.growth_ratio).then(|| {
        format!(
            "Pic de croissance probable : +{:.0}% de volume sur 48 h",
            (ratio - 1.0) * 100.0
        )
    })
}

fn detect_desync(ctx: &PatternContext<'_>) -> Option<String> {
    let own = ctx.feeds.last()?;
    let sibling = ctx.sibling_feeds.last()?;
    let gap = minutes_between(sibling.timestamp, own.timestamp).abs();
    (gap > ctx.config.patterns.desync_minutes)
        .then(|| format!("Décalage de {:.0} min avec l'autre bébé", gap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Subject;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn feed(subject: Subject, ts: Timestamp, ml: f64) -> FeedEvent {
        FeedEvent::bottle(format!("{}-{ts}", subject.as_str()), subject, ts, ml)
    }

    fn ids(patterns: &[DetectedPattern]) -> Vec<PatternId> {
        patterns.iter().map(|p| p.id).collect()
    }

    fn detect(feeds: &[FeedEvent], sleeps: &[SleepEvent], sibling: &[FeedEvent], now: Timestamp) -> Vec<DetectedPattern> {
        let profile = Profile::default_a();
        let config = EngineConfig::default();
        detect_patterns(&profile, &config, feeds, sleeps, sibling, now)
    }

    #[test]
    fn test_cluster_with_four_recent_feeds() {
        let feeds: Vec<FeedEvent> = [(11, 0), (11, 50), (12, 40), (13, 30)]
            .iter()
            .map(|(h, m)| feed(Subject::A, at(10, *h, *m), 120.0))
            .collect();
        let patterns = detect(&feeds, &[], &[], at(10, 13, 45));
        let cluster = patterns.iter().find(|p| p.id == PatternId::Cluster).unwrap();
        assert_eq!(cluster.timing_modifier, Some(1.30));
        assert_eq!(cluster.volume_modifier, None);
    }

    #[test]
    fn test_compensation_after_small_feed() {
        let feeds = vec![
            feed(Subject::A, at(10, 7, 0), 150.0),
            feed(Subject::A, at(10, 10, 30), 140.0),
            feed(Subject::A, at(10, 14, 0), 50.0),
        ];
        let patterns = detect(&feeds, &[], &[], at(10, 14, 10));
        assert_eq!(ids(&patterns), vec![PatternId::Compensation]);
        assert_eq!(patterns[0].timing_modifier, Some(0.75));
    }

    #[test]
    fn test_time_of_day_regimes() {
        let evening = detect(&[], &[], &[], at(10, 19, 0));
        assert_eq!(ids(&evening), vec![PatternId::Evening]);
        let night = detect(&[], &[], &[], at(10, 2, 0));
        assert_eq!(ids(&night), vec![PatternId::NightLight]);
        assert_eq!(night[0].volume_modifier, Some(0.85));
        assert!(detect(&[], &[], &[], at(10, 11, 0)).is_empty());
    }

    #[test]
    fn test_post_nap_requires_long_recent_nap() {
        let long_nap = vec![SleepEvent::new("n1", Subject::A, at(10, 12, 0), Some(at(10, 13, 0)))];
        let patterns = detect(&[], &long_nap, &[], at(10, 13, 20));
        assert_eq!(ids(&patterns), vec![PatternId::PostNap]);

        let short_nap = vec![SleepEvent::new("n2", Subject::A, at(10, 12, 30), Some(at(10, 13, 0)))];
        assert!(detect(&[], &short_nap, &[], at(10, 13, 20)).is_empty());
        // Ended too long ago
        assert!(detect(&[], &long_nap, &[], at(10, 13, 45)).is_empty());
    }

    #[test]
    fn test_growth_spurt_detection() {
        let mut feeds = Vec::new();
        for d in 1..8u32 {
            feeds.push(feed(Subject::A, at(d, 8, 0), 100.0));
            feeds.push(feed(Subject::A, at(d, 14, 0), 100.0));
        }
        for (d, h) in [(9, 8), (9, 14), (10, 8), (10, 11)] {
            feeds.push(feed(Subject::A, at(d, h, 0), 140.0));
        }
        let patterns = detect(&feeds, &[], &[], at(10, 12, 0));
        let growth = patterns.iter().find(|p| p.id == PatternId::Growth).unwrap();
        assert_eq!(growth.volume_modifier, Some(1.15));
    }

    #[test]
    fn test_desync_is_informational() {
        let own = vec![feed(Subject::A, at(10, 9, 0), 120.0)];
        let sibling = vec![feed(Subject::B, at(10, 10, 30), 120.0)];
        let patterns = detect(&own, &[], &sibling, at(10, 11, 0));
        assert_eq!(ids(&patterns), vec![PatternId::Desync]);
        assert_eq!(patterns[0].timing_modifier, None);
        assert_eq!(patterns[0].volume_modifier, None);
    }

    #[test]
    fn test_detection_is_pure() {
        let feeds = vec![
            feed(Subject::A, at(10, 18, 0), 150.0),
            feed(Subject::A, at(10, 19, 0), 150.0),
            feed(Subject::A, at(10, 20, 0), 60.0),
        ];
        let sibling = vec![feed(Subject::B, at(10, 17, 0), 120.0)];
        let first = detect(&feeds, &[], &sibling, at(10, 20, 30));
        let second = detect(&feeds, &[], &sibling, at(10, 20, 30));
        assert_eq!(first, second);
        assert_eq!(
            ids(&first),
            vec![PatternId::Cluster, PatternId::Compensation, PatternId::Evening, PatternId::Desync]
        );
    }
}
