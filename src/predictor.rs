//! Next-feed prediction
//!
//! Combines the slot model, the active patterns and the profile adjustments
//! into a time and a volume for the next feed. Every modifier that touches the
//! result is recorded as an explanation, in the order it was applied.
//!
//! Fallback chain:
//! 1. No usable history, or the last feed is older than the p90 interval
//!    (tracking lapse) -> projection from the profile alone.
//! 2. Interval-based prediction from the last feed, chained forward past `now`.
//! 3. Post-nap rebasing when a recent nap has not been followed by a feed.

use chrono::{Duration, NaiveTime, Timelike};
use tracing::{debug, trace};

use crate::clock::{add_minutes, minutes_between};
use crate::config::EngineConfig;
use crate::patterns::{detect_in_context, PatternContext};
use crate::profile::Profile;
use crate::recency::{config_weight, weighted_median, within_window, Weighted};
use crate::sleep::is_nap;
use crate::slots::{SlotCache, SlotModel};
use crate::types::{
    ConfidenceTier, DetectedPattern, Explanation, FeedEvent, ImpactAxis, Prediction, SleepEvent,
    SlotId, Subject, Timestamp, TimingEstimate, VolumeEstimate,
};

/// z-score of the 90th percentile of a normal distribution
const Z_P90: f64 = 1.2816;

/// Feed predictor for one subject
pub struct FeedPredictor<'a> {
    profile: &'a Profile,
    config: &'a EngineConfig,
}

impl<'a> FeedPredictor<'a> {
    pub fn new(profile: &'a Profile, config: &'a EngineConfig) -> Self {
        Self { profile, config }
    }

    fn subject(&self) -> Subject {
        self.profile.subject
    }

    /// Predict the next feed from the subject's own feeds and sleeps
    ///
    /// `sibling_feeds` only feeds the informational desync pattern.
    pub fn predict_next_feed(
        &self,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        sibling_feeds: &[FeedEvent],
        now: Timestamp,
    ) -> Prediction {
        let feeds = within_window(feeds, now, self.config.window_days);
        let sleeps = within_window(sleeps, now, self.config.window_days);
        let sibling_feeds = within_window(sibling_feeds, now, self.config.window_days);

        let mut cache = SlotCache::new(SlotModel::new(self.profile, self.config), feeds, now);
        let patterns = detect_in_context(&PatternContext {
            profile: self.profile,
            config: self.config,
            feeds,
            sleeps,
            sibling_feeds,
            now,
        });

        let last = match feeds.last() {
            None => {
                debug!(subject = self.subject().as_str(), "no feed history, profile projection");
                return self.profile_projection(
                    &mut cache,
                    &patterns,
                    now,
                    "Aucun repas enregistré : projection depuis le profil",
                );
            }
            Some(last) => last,
        };

        let since_last = minutes_between(last.timestamp, now);
        let stale_after = self.profile.interval.p90 * self.config.stale_interval_factor;
        if since_last > stale_after {
            debug!(
                subject = self.subject().as_str(),
                since_last, stale_after, "tracking lapse, profile projection"
            );
            return self.profile_projection(
                &mut cache,
                &patterns,
                now,
                "Suivi interrompu depuis le dernier repas : projection depuis le profil",
            );
        }

        let mut explanations = Vec::new();

        // Interval from the slot the next feed should fall in
        let median = cache.median_interval();
        let target = SlotId::for_timestamp(add_minutes(last.timestamp, median));
        let base = cache.interval(target);
        explanations.push(Explanation::shift(
            "SLOT_INTERVAL",
            format!(
                "Intervalle {} du créneau {} ({})",
                if base.data_driven { "observé" } else { "de référence" },
                target.as_str(),
                format_minutes(base.value)
            ),
            base.value,
        ));

        let mut interval = base.value;
        for pattern in &patterns {
            if let Some(m) = pattern.timing_modifier {
                interval *= m;
                explanations.push(Explanation::multiplier(
                    pattern.id.as_str(),
                    pattern.description.clone(),
                    ImpactAxis::Interval,
                    m,
                ));
            }
        }
        let adjustments = &self.profile.adjustments;
        if adjustments.interval_multiplier != 1.0 {
            interval *= adjustments.interval_multiplier;
            explanations.push(Explanation::multiplier(
                "PROFILE_INTERVAL",
                "Ajustement d'intervalle du profil",
                ImpactAxis::Interval,
                adjustments.interval_multiplier,
            ));
        }
        if target == SlotId::Evening && adjustments.evening_interval_factor != 1.0 {
            interval *= adjustments.evening_interval_factor;
            explanations.push(Explanation::multiplier(
                "PROFILE_EVENING",
                "Soirée : intervalle réduit pour ce profil",
                ImpactAxis::Interval,
                adjustments.evening_interval_factor,
            ));
        }

        let initial = add_minutes(last.timestamp, interval);
        let (mut predicted, steps) = self.chain_forward(initial, now, &mut cache);
        if steps > 0 {
            explanations.push(Explanation::shift(
                "CHAIN_FORWARD",
                format!("Heure déjà passée : avancée de {} intervalle(s) de créneau", steps),
                minutes_between(initial, predicted),
            ));
        }

        if let Some((candidate, latency, nap_end)) = self.post_nap_candidate(feeds, sleeps, now, &mut cache) {
            if candidate < predicted {
                explanations.push(Explanation::shift(
                    "POST_NAP_REBASE",
                    format!(
                        "Recalé sur la fin de sieste ({}) + {} de latence habituelle",
                        nap_end.format("%H:%M"),
                        format_minutes(latency)
                    ),
                    minutes_between(predicted, candidate),
                ));
                predicted = candidate;
            }
        }

        let resolved = SlotId::for_timestamp(predicted);
        let volume = self.predict_volume(resolved, Some(last), &patterns, &mut cache, &mut explanations);
        let timing = self.timing_estimate(predicted, resolved, now, &mut cache);

        Prediction {
            subject: self.subject(),
            timing,
            volume,
            explanations,
            confidence: self.confidence_tier(feeds, now),
            slot: resolved,
            generated_at: now,
            profile_fallback: false,
            patterns: patterns.iter().map(|p| p.id).collect(),
        }
    }

    /// Step forward from the start of the current slot using slot intervals
    fn profile_projection(
        &self,
        cache: &mut SlotCache<'_>,
        patterns: &[DetectedPattern],
        now: Timestamp,
        reason: &str,
    ) -> Prediction {
        let current = SlotId::for_timestamp(now);
        let start = slot_start(now, current);
        let (predicted, steps) = self.chain_forward(start, now, cache);

        let mut explanations = vec![Explanation::shift(
            "PROFILE_FALLBACK",
            format!(
                "{} ({} pas depuis le début du créneau {})",
                reason,
                steps,
                current.as_str()
            ),
            minutes_between(start, predicted),
        )];

        let resolved = SlotId::for_timestamp(predicted);
        let volume = self.predict_volume(resolved, None, patterns, cache, &mut explanations);
        let timing = self.timing_estimate(predicted, resolved, now, cache);

        Prediction {
            subject: self.subject(),
            timing,
            volume,
            explanations,
            confidence: ConfidenceTier::Low,
            slot: resolved,
            generated_at: now,
            profile_fallback: true,
            patterns: patterns.iter().map(|p| p.id).collect(),
        }
    }

    /// Advance `from` by slot intervals until it is no earlier than `now`
    ///
    /// Steps are floored at `min_step_minutes` and capped at `max_chain_steps`;
    /// the result is clamped to `now` if the cap is hit.
    fn chain_forward(&self, from: Timestamp, now: Timestamp, cache: &mut SlotCache<'_>) -> (Timestamp, usize) {
        let mut t = from;
        let mut steps = 0;
        while t < now && steps < self.config.max_chain_steps {
            let slot = SlotId::for_timestamp(t);
            let step = cache.interval(slot).value.max(self.config.min_step_minutes);
            t = add_minutes(t, step);
            steps += 1;
            trace!(slot = slot.as_str(), step, %t, "chain step");
        }
        if t < now {
            t = now;
        }
        (t, steps)
    }

    /// Candidate anchored on the most recent nap, if no feed followed it
    fn post_nap_candidate(
        &self,
        feeds: &[FeedEvent],
        sleeps: &[SleepEvent],
        now: Timestamp,
        cache: &mut SlotCache<'_>,
    ) -> Option<(Timestamp, f64, Timestamp)> {
        // Asleep again since the nap: nothing to rebase on
        if sleeps.last().is_some_and(|s| s.is_in_progress()) {
            return None;
        }
        let nap = sleeps
            .iter()
            .rev()
            .filter(|s| is_nap(s, self.config))
            .find(|s| matches!(s.end, Some(end) if end <= now))?;
        let nap_end = nap.end?;
        if minutes_between(nap_end, now) > self.config.post_nap_lookback_hours * 60.0 {
            return None;
        }
        if feeds.iter().any(|f| f.timestamp >= nap_end) {
            return None;
        }

        let latency = self.post_nap_latency(feeds, sleeps, now);
        let (candidate, _) = self.chain_forward(add_minutes(nap_end, latency), now, cache);
        debug!(
            subject = self.subject().as_str(),
            %nap_end, latency, %candidate, "post-nap candidate"
        );
        Some((candidate, latency, nap_end))
    }

    /// Weighted-median delay between a nap's end and the next feed
    pub fn post_nap_latency(&self, feeds: &[FeedEvent], sleeps: &[SleepEvent], now: Timestamp) -> f64 {
        let window = self.config.post_nap_feed_window_minutes;
        let samples: Vec<Weighted> = sleeps
            .iter()
            .filter(|s| is_nap(s, self.config))
            .filter_map(|nap| {
                let end = nap.end?;
                let idx = feeds.partition_point(|f| f.timestamp < end);
                let next = feeds.get(idx)?;
                let latency = minutes_between(end, next.timestamp);
                (latency <= window).then(|| (latency, config_weight(self.config, end, now)))
            })
            .collect();
        if samples.len() < self.config.min_samples {
            return self.config.default_post_nap_latency_minutes;
        }
        weighted_median(&samples)
    }

    fn predict_volume(
        &self,
        slot: SlotId,
        last: Option<&FeedEvent>,
        patterns: &[DetectedPattern],
        cache: &mut SlotCache<'_>,
        explanations: &mut Vec<Explanation>,
    ) -> VolumeEstimate {
        let stat = cache.volume(slot);
        let slot_mean = stat.value;
        let mut ml = slot_mean;

        for pattern in patterns {
            if let Some(m) = pattern.volume_modifier {
                ml *= m;
                explanations.push(Explanation::multiplier(
                    pattern.id.as_str(),
                    pattern.description.clone(),
                    ImpactAxis::Volume,
                    m,
                ));
            }
        }

        let adjustments = &self.profile.adjustments;
        let slot_factor = match slot {
            SlotId::Evening => Some(("PROFILE_EVENING_VOLUME", "Soirée : volume du profil", adjustments.evening_volume_factor)),
            SlotId::Night => Some(("PROFILE_NIGHT_VOLUME", "Nuit : volume du profil", adjustments.night_volume_factor)),
            SlotId::Midday => Some(("PROFILE_MIDDAY_VOLUME", "Midi : volume du profil", adjustments.midday_volume_factor)),
            _ => None,
        };
        if let Some((rule, text, factor)) = slot_factor {
            if factor != 1.0 {
                ml *= factor;
                explanations.push(Explanation::multiplier(rule, text, ImpactAxis::Volume, factor));
            }
        }

        if let Some(last) = last.filter(|f| f.has_volume()) {
            let own_mean = cache.volume(SlotId::for_hour(last.hour())).value;
            if own_mean > 0.0 {
                let ratio = last.volume_ml / own_mean;
                let nudge = if ratio < 0.7 {
                    Some((1.10, "Dernier repas petit : léger rattrapage"))
                } else if ratio > 1.3 {
                    Some((0.90, "Dernier repas copieux : volume modéré"))
                } else {
                    None
                };
                if let Some((factor, text)) = nudge {
                    ml *= factor;
                    explanations.push(Explanation::multiplier(
                        "VOLUME_COMPENSATION",
                        text,
                        ImpactAxis::Volume,
                        factor,
                    ));
                }
            }
        }

        let (lo, hi) = (slot_mean * 0.5, slot_mean * 1.5);
        if ml < lo || ml > hi {
            let clamped = ml.clamp(lo, hi);
            explanations.push(Explanation::multiplier(
                "VOLUME_CLAMP",
                "Volume borné entre 50% et 150% de la moyenne du créneau",
                ImpactAxis::Volume,
                if ml > 0.0 { clamped / ml } else { 1.0 },
            ));
            ml = clamped;
        }

        let spread = stat.spread;
        VolumeEstimate {
            ml,
            confidence_ml: spread * 0.5,
            p10_ml: (ml - Z_P90 * spread).max(0.0),
            p90_ml: ml + Z_P90 * spread,
            slot_mean_ml: slot_mean,
        }
    }

    fn timing_estimate(
        &self,
        predicted: Timestamp,
        slot: SlotId,
        now: Timestamp,
        cache: &mut SlotCache<'_>,
    ) -> TimingEstimate {
        let predicted = predicted.max(now);
        let spread = cache.interval(slot).spread;
        let p10 = add_minutes(predicted, -Z_P90 * spread).max(now);
        let p90 = add_minutes(predicted, Z_P90 * spread);
        TimingEstimate {
            predicted_at: predicted,
            confidence_minutes: (spread * 0.5).round(),
            p10,
            p90,
        }
    }

    /// Tier from the total recency weight of windowed feeds
    pub fn confidence_tier(&self, feeds: &[FeedEvent], now: Timestamp) -> ConfidenceTier {
        let weight: f64 = feeds
            .iter()
            .map(|f| config_weight(self.config, f.timestamp, now))
            .sum();
        if weight >= self.config.high_confidence_weight {
            ConfidenceTier::High
        } else if weight >= self.config.medium_confidence_weight {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Start of the occurrence of `slot` that contains `now`
fn slot_start(now: Timestamp, slot: SlotId) -> Timestamp {
    let (start_hour, _) = slot.hours();
    let midnight = now.date().and_time(NaiveTime::MIN);
    let start = midnight + Duration::hours(start_hour as i64);
    if now.hour() < start_hour {
        start - Duration::days(1)
    } else {
        start
    }
}

fn format_minutes(minutes: f64) -> String {
    let total = minutes.round().max(0.0) as i64;
    if total >= 60 {
        format!("{}h{:02}", total / 60, total % 60)
    } else {
        format!("{} min", total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn feed(ts: Timestamp, ml: f64) -> FeedEvent {
        FeedEvent::bottle(format!("f-{ts}"), Subject::A, ts, ml)
    }

    fn predict(feeds: &[FeedEvent], sleeps: &[SleepEvent], now: Timestamp) -> Prediction {
        let profile = Profile::default_a();
        let config = EngineConfig::default();
        FeedPredictor::new(&profile, &config).predict_next_feed(feeds, sleeps, &[], now)
    }

    #[test]
    fn test_empty_history_uses_profile() {
        let now = at(10, 11, 20);
        let prediction = predict(&[], &[], now);
        assert!(prediction.profile_fallback);
        assert_eq!(prediction.confidence, ConfidenceTier::Low);
        assert!(prediction.timing.predicted_at >= now);
        // Midday starts at 10:00, baseline interval 195 min -> 13:15
        assert_eq!(prediction.timing.predicted_at, at(10, 13, 15));
        assert_eq!(prediction.explanations[0].rule, "PROFILE_FALLBACK");
    }

    #[test]
    fn test_night_projection_starts_previous_evening() {
        let now = at(10, 2, 0);
        let prediction = predict(&[], &[], now);
        // Night starts at 22:00 on the 9th, baseline 240 min -> 02:00
        assert_eq!(prediction.timing.predicted_at, at(10, 2, 0));
    }

    #[test]
    fn test_stale_history_is_fallback_not_error() {
        let feeds = vec![feed(at(10, 6, 0), 130.0)];
        let prediction = predict(&feeds, &[], at(10, 12, 0));
        assert!(prediction.profile_fallback);
    }

    #[test]
    fn test_compensation_scenario_shifts_earlier() {
        let feeds = vec![
            feed(at(10, 7, 0), 150.0),
            feed(at(10, 10, 30), 140.0),
            feed(at(10, 14, 0), 50.0),
        ];
        let now = at(10, 14, 10);
        let prediction = predict(&feeds, &[], now);
        assert!(!prediction.profile_fallback);
        let comp = prediction
            .explanations
            .iter()
            .find(|e| e.rule == "COMPENSATION")
            .unwrap();
        assert_eq!(comp.impact, "-25% intervalle");
        let baseline = at(10, 14, 0) + Duration::minutes(200);
        assert!(prediction.timing.predicted_at < baseline);
        assert_eq!(prediction.timing.predicted_at, at(10, 16, 30));
    }

    #[test]
    fn test_prediction_never_in_past() {
        let feeds = vec![
            feed(at(10, 5, 0), 120.0),
            feed(at(10, 5, 40), 120.0),
            feed(at(10, 6, 20), 120.0),
            feed(at(10, 7, 0), 120.0),
        ];
        let now = at(10, 10, 0);
        let prediction = predict(&feeds, &[], now);
        assert!(prediction.timing.predicted_at >= now);
        assert!(prediction.timing.p10 >= now);
    }

    #[test]
    fn test_volume_within_slot_bounds() {
        let feeds = vec![
            feed(at(10, 16, 0), 20.0),
            feed(at(10, 18, 0), 20.0),
            feed(at(10, 20, 0), 20.0),
        ];
        for now in [at(10, 20, 5), at(10, 21, 0), at(10, 22, 30)] {
            let p = predict(&feeds, &[], now);
            assert!(p.volume.ml >= 0.5 * p.volume.slot_mean_ml - 1e-9);
            assert!(p.volume.ml <= 1.5 * p.volume.slot_mean_ml + 1e-9);
        }
    }

    #[test]
    fn test_post_nap_rebasing() {
        let mut feeds = Vec::new();
        let mut sleeps = Vec::new();
        // Three prior days: nap 12:10-13:00 followed by a feed 20 min later
        for d in 7..10u32 {
            feeds.push(feed(at(d, 9, 30), 130.0));
            sleeps.push(SleepEvent::new(format!("n{d}"), Subject::A, at(d, 12, 10), Some(at(d, 13, 0))));
            feeds.push(feed(at(d, 13, 20), 130.0));
        }
        feeds.push(feed(at(10, 11, 30), 130.0));
        sleeps.push(SleepEvent::new("n10", Subject::A, at(10, 12, 10), Some(at(10, 13, 0))));

        let profile = Profile::default_a();
        let config = EngineConfig::default();
        let predictor = FeedPredictor::new(&profile, &config);
        assert_eq!(predictor.post_nap_latency(&feeds, &sleeps, at(10, 13, 5)), 20.0);

        let prediction = predict(&feeds, &sleeps, at(10, 13, 5));
        assert_eq!(prediction.timing.predicted_at, at(10, 13, 20));
        assert!(prediction.explanations.iter().any(|e| e.rule == "POST_NAP_REBASE"));
    }

    #[test]
    fn test_no_post_nap_rebase_while_asleep() {
        let mut feeds = Vec::new();
        let mut sleeps = Vec::new();
        for d in 7..10u32 {
            feeds.push(feed(at(d, 9, 30), 130.0));
            sleeps.push(SleepEvent::new(format!("n{d}"), Subject::A, at(d, 12, 10), Some(at(d, 13, 0))));
            feeds.push(feed(at(d, 13, 20), 130.0));
        }
        feeds.push(feed(at(10, 11, 30), 130.0));
        sleeps.push(SleepEvent::new("n10", Subject::A, at(10, 12, 10), Some(at(10, 13, 0))));
        sleeps.push(SleepEvent::new("n10b", Subject::A, at(10, 13, 10), None));

        let prediction = predict(&feeds, &sleeps, at(10, 13, 15));
        assert!(!prediction.explanations.iter().any(|e| e.rule == "POST_NAP_REBASE"));
    }

    #[test]
    fn test_chain_cap_clamps_to_now() {
        let profile = Profile::default_a();
        let config = EngineConfig {
            max_chain_steps: 2,
            stale_interval_factor: 10.0,
            ..EngineConfig::default()
        };
        let now = at(10, 23, 0);
        let feeds = vec![feed(at(10, 6, 0), 120.0)];
        let prediction = FeedPredictor::new(&profile, &config).predict_next_feed(&feeds, &[], &[], now);

        assert!(!prediction.profile_fallback);
        assert_eq!(prediction.timing.predicted_at, now);
        let chain = prediction
            .explanations
            .iter()
            .find(|e| e.rule == "CHAIN_FORWARD")
            .unwrap();
        assert!(chain.text.contains("2 intervalle(s)"), "{}", chain.text);
    }

    #[test]
    fn test_chain_step_floor() {
        let mut profile = Profile::default_a();
        for slot in &mut profile.slots {
            slot.interval_minutes = 5.0;
        }
        let config = EngineConfig::default();
        let predictor = FeedPredictor::new(&profile, &config);
        let now = at(10, 11, 20);
        let mut cache = SlotCache::new(SlotModel::new(&profile, &config), &[], now);

        // 30 min floor instead of 5 min steps: 10:30, 11:00, 11:30
        assert_eq!(predictor.chain_forward(at(10, 10, 0), now, &mut cache), (at(10, 11, 30), 3));

        let prediction = predictor.predict_next_feed(&[], &[], &[], now);
        assert_eq!(prediction.timing.predicted_at, at(10, 11, 30));
    }

    #[test]
    fn test_confidence_tiers() {
        let profile = Profile::default_a();
        let config = EngineConfig::default();
        let predictor = FeedPredictor::new(&profile, &config);
        let now = at(20, 12, 0);
        let feeds: Vec<FeedEvent> = (0..14)
            .map(|i| feed(now - Duration::hours(3 * (i + 1)), 120.0))
            .rev()
            .collect();
        // 14 recent feeds x 3 = 42
        assert_eq!(predictor.confidence_tier(&feeds, now), ConfidenceTier::Medium);
        assert_eq!(predictor.confidence_tier(&feeds[..5], now), ConfidenceTier::Low);
    }

    #[test]
    fn test_explanations_are_deterministic() {
        let feeds = vec![
            feed(at(10, 17, 0), 140.0),
            feed(at(10, 18, 30), 60.0),
            feed(at(10, 19, 30), 90.0),
        ];
        let a = predict(&feeds, &[], at(10, 19, 40));
        let b = predict(&feeds, &[], at(10, 19, 40));
        assert_eq!(a, b);
    }
}
