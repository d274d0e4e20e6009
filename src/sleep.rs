//! Sleep analysis
//!
//! Daily nap totals plus next-nap and bedtime predictions. The next nap comes
//! from an ordered list of strategies where the first one yielding a future
//! time wins; bedtime comes from historical bedtimes with two corrections once
//! the day's naps are over.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{add_minutes, at_clock, clock_minutes, day_start, minutes_between};
use crate::config::EngineConfig;
use crate::profile::Profile;
use crate::recency::{config_weight, weighted_avg, weighted_median, within_window, Weighted};
use crate::types::{Explanation, FeedEvent, SleepEvent, Subject, Timestamp};

/// True when the sleep started during nap hours
pub fn is_nap(sleep: &SleepEvent, config: &EngineConfig) -> bool {
    let hour = sleep.start.hour();
    hour >= config.nap_start_hour && hour < config.night_start_hour
}

/// True when the sleep started at or after the night threshold
pub fn is_bedtime_sleep(sleep: &SleepEvent, config: &EngineConfig) -> bool {
    sleep.start.hour() >= config.night_start_hour
}

/// Which strategy produced the nap prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NapStrategy {
    /// Last nap end + typical gap between naps
    InterNapGap,
    /// Last wake + default wake window
    WakeWindow,
    /// Last feed + typical feed-to-nap latency
    FeedLatency,
    /// Next customary nap window of the profile
    DefaultWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NapPrediction {
    pub at: Timestamp,
    pub strategy: NapStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedtimePrediction {
    pub at: Timestamp,
    pub expected_wake: Timestamp,
    pub night_duration_minutes: f64,
    /// False when profile defaults were used
    pub data_driven: bool,
    pub adjustments: Vec<Explanation>,
}

/// Sleep summary and predictions for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepAnalysis {
    pub subject: Subject,
    pub naps_today: usize,
    pub nap_minutes_today: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_night_minutes: Option<f64>,
    pub is_sleeping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_wake: Option<Timestamp>,
    pub next_nap: Option<NapPrediction>,
    pub bedtime: Option<BedtimePrediction>,
    pub generated_at: Timestamp,
}

/// Windowed view of a subject's sleep history
struct SleepDay<'a> {
    feeds: &'a [FeedEvent],
    completed: Vec<&'a SleepEvent>,
    naps_today: Vec<&'a SleepEvent>,
    in_progress: Option<&'a SleepEvent>,
    last_wake: Option<Timestamp>,
    today_start: Timestamp,
    now: Timestamp,
}

pub struct SleepAnalyzer<'a> {
    profile: &'a Profile,
    config: &'a EngineConfig,
}

impl<'a> SleepAnalyzer<'a> {
    pub fn new(profile: &'a Profile, config: &'a EngineConfig) -> Self {
        Self { profile, config }
    }

    pub fn analyze(&self, feeds: &[FeedEvent], sleeps: &[SleepEvent], now: Timestamp) -> SleepAnalysis {
        let feeds = within_window(feeds, now, self.config.window_days);
        let sleeps = within_window(sleeps, now, self.config.window_days);
        let today_start = day_start(now, self.config.day_boundary_hour);

        let completed: Vec<&SleepEvent> = sleeps
            .iter()
            .filter(|s| matches!(s.end, Some(end) if end <= now))
            .collect();
        let naps_today: Vec<&SleepEvent> = completed
            .iter()
            .copied()
            .filter(|s| is_nap(s, self.config) && s.start >= today_start)
            .collect();
        let in_progress = sleeps.iter().rev().find(|s| s.is_in_progress());
        let last_wake = completed.iter().filter_map(|s| s.end).max();

        let day = SleepDay {
            feeds,
            completed,
            naps_today,
            in_progress,
            last_wake,
            today_start,
            now,
        };

        let nap_minutes_today: f64 = day
            .naps_today
            .iter()
            .filter_map(|s| s.duration_minutes())
            .sum();
        let last_night_minutes = day
            .completed
            .iter()
            .rev()
            .find(|s| !is_nap(s, self.config))
            .and_then(|s| s.duration_minutes());

        let mut next_nap = self.predict_next_nap(&day);
        let bedtime = self.predict_bedtime(&day, nap_minutes_today, next_nap.as_ref());
        if let (Some(nap), Some(bed)) = (&next_nap, &bedtime) {
            if nap.at >= bed.at {
                debug!(subject = self.profile.subject.as_str(), "nap after bedtime dropped");
                next_nap = None;
            }
        }

        SleepAnalysis {
            subject: self.profile.subject,
            naps_today: day.naps_today.len(),
            nap_minutes_today,
            last_night_minutes,
            is_sleeping: day.in_progress.is_some(),
            last_wake,
            next_nap,
            bedtime,
            generated_at: now,
        }
    }

    fn predict_next_nap(&self, day: &SleepDay<'_>) -> Option<NapPrediction> {
        if day.in_progress.is_some() {
            return None;
        }
        let now = day.now;
        let prediction = self
            .from_inter_nap_gap(day)
            .map(|at| (at, NapStrategy::InterNapGap))
            .or_else(|| self.from_wake_window(day).map(|at| (at, NapStrategy::WakeWindow)))
            .or_else(|| self.from_feed_latency(day).map(|at| (at, NapStrategy::FeedLatency)))
            .or_else(|| self.from_default_window(day).map(|at| (at, NapStrategy::DefaultWindow)))
            .filter(|(at, _)| *at > now)
            .map(|(at, strategy)| NapPrediction { at, strategy })?;

        // A nap cannot start during night hours
        let hour = prediction.at.hour();
        if hour < self.config.nap_start_hour || hour >= self.config.night_start_hour {
            debug!(at = %prediction.at, "predicted nap falls in night hours, dropped");
            return None;
        }
        debug!(
            subject = self.profile.subject.as_str(),
            strategy = ?prediction.strategy,
            at = %prediction.at,
            "next nap"
        );
        Some(prediction)
    }

    /// A. Last nap end today + weighted-median gap between naps
    fn from_inter_nap_gap(&self, day: &SleepDay<'_>) -> Option<Timestamp> {
        let last_nap = day.naps_today.last()?;
        let samples = self.inter_nap_gaps(day);
        if samples.len() < self.config.min_samples {
            return None;
        }
        let at = add_minutes(last_nap.end?, weighted_median(&samples));
        (at > day.now).then_some(at)
    }

    /// B. Last wake + default wake window, once a nap happened today
    fn from_wake_window(&self, day: &SleepDay<'_>) -> Option<Timestamp> {
        day.naps_today.last()?;
        let sleep = &self.profile.sleep;
        let window = (sleep.wake_window_min_minutes + sleep.wake_window_max_minutes) / 2.0;
        let at = add_minutes(day.last_wake?, window);
        (at > day.now).then_some(at)
    }

    /// C. No nap yet today: last feed + weighted-median feed-to-nap latency
    fn from_feed_latency(&self, day: &SleepDay<'_>) -> Option<Timestamp> {
        if !day.naps_today.is_empty() {
            return None;
        }
        let last_feed = day.feeds.last()?;
        let samples = self.feed_to_nap_latencies(day);
        if samples.len() < self.config.min_samples {
            return None;
        }
        let at = add_minutes(last_feed.timestamp, weighted_median(&samples));
        (at > day.now).then_some(at)
    }

    /// D. Midpoint of the next unused customary nap window
    fn from_default_window(&self, day: &SleepDay<'_>) -> Option<Timestamp> {
        let mut windows = self.profile.sleep.nap_windows.clone();
        windows.sort_by(|a, b| a.start_minutes.total_cmp(&b.start_minutes));
        let earliest = add_minutes(day.now, self.config.sleep.min_nap_lead_minutes);

        windows
            .iter()
            .filter(|w| {
                !day.naps_today
                    .iter()
                    .any(|n| w.contains(clock_minutes(n.start)))
            })
            .find(|w| at_clock(day.today_start, w.end_minutes) > day.now)
            .map(|w| at_clock(day.today_start, w.midpoint()).max(earliest))
    }

    fn inter_nap_gaps(&self, day: &SleepDay<'_>) -> Vec<Weighted> {
        let cfg = &self.config.sleep;
        let naps: Vec<&SleepEvent> = day
            .completed
            .iter()
            .copied()
            .filter(|s| is_nap(s, self.config))
            .collect();
        naps.windows(2)
            .filter_map(|pair| {
                let prev_end = pair[0].end?;
                let same_day = day_start(pair[0].start, self.config.day_boundary_hour)
                    == day_start(pair[1].start, self.config.day_boundary_hour);
                let gap = minutes_between(prev_end, pair[1].start);
                (same_day && gap >= cfg.min_inter_nap_gap_minutes && gap <= cfg.max_inter_nap_gap_minutes)
                    .then(|| (gap, config_weight(self.config, prev_end, day.now)))
            })
            .collect()
    }

    fn feed_to_nap_latencies(&self, day: &SleepDay<'_>) -> Vec<Weighted> {
        let max = self.config.sleep.max_feed_to_nap_minutes;
        day.completed
            .iter()
            .filter(|s| is_nap(s, self.config))
            .filter_map(|nap| {
                let idx = day.feeds.partition_point(|f| f.timestamp <= nap.start);
                let feed = day.feeds.get(idx.checked_sub(1)?)?;
                let latency = minutes_between(feed.timestamp, nap.start);
                (latency <= max).then(|| (latency, config_weight(self.config, nap.start, day.now)))
            })
            .collect()
    }

    fn predict_bedtime(
        &self,
        day: &SleepDay<'_>,
        nap_minutes_today: f64,
        next_nap: Option<&NapPrediction>,
    ) -> Option<BedtimePrediction> {
        if let Some(current) = day.in_progress {
            if !is_nap(current, self.config) {
                return None;
            }
        }
        let cfg = &self.config.sleep;
        let baseline = &self.profile.sleep;

        let nights: Vec<(Weighted, Weighted)> = day
            .completed
            .iter()
            .filter(|s| is_bedtime_sleep(s, self.config))
            .filter_map(|s| {
                let length = s.duration_minutes()?;
                (length > cfg.min_night_minutes).then(|| {
                    let w = config_weight(self.config, s.start, day.now);
                    ((clock_minutes(s.start), w), (length, w))
                })
            })
            .collect();
        let data_driven = nights.len() >= self.config.min_samples;
        let (clock, night_minutes) = if data_driven {
            let clocks: Vec<Weighted> = nights.iter().map(|(c, _)| *c).collect();
            let lengths: Vec<Weighted> = nights.iter().map(|(_, l)| *l).collect();
            (weighted_median(&clocks), weighted_avg(&lengths))
        } else {
            (baseline.bedtime_minutes, baseline.night_duration_minutes)
        };

        let mut bedtime = at_clock(day.today_start, clock);
        let mut adjustments = Vec::new();

        // Deficit and wake-window corrections wait until no further nap is expected today
        let naps_done = next_nap.is_none() && day.in_progress.is_none();
        if naps_done {
            let deficit = baseline.expected_day_sleep_minutes - nap_minutes_today;
            if deficit > cfg.deficit_threshold_minutes {
                let pull = (deficit * cfg.deficit_pull_ratio).min(cfg.max_deficit_pull_minutes);
                bedtime = add_minutes(bedtime, -pull);
                adjustments.push(Explanation::shift(
                    "SLEEP_DEFICIT",
                    format!("Déficit de sieste de {:.0} min : coucher avancé", deficit),
                    -pull,
                ));
            }
            if let Some(wake) = day.last_wake {
                let cap = add_minutes(wake, baseline.max_wake_window_minutes);
                if bedtime > cap {
                    adjustments.push(Explanation::shift(
                        "WAKE_WINDOW_CAP",
                        "Coucher limité par la fenêtre d'éveil maximale",
                        minutes_between(bedtime, cap),
                    ));
                    bedtime = cap;
                }
            }
        }

        if bedtime <= day.now {
            return None;
        }
        Some(BedtimePrediction {
            at: bedtime,
            expected_wake: add_minutes(bedtime, night_minutes),
            night_duration_minutes: night_minutes,
            data_driven,
            adjustments,
        })
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

    fn nap(d: u32, from: (u32, u32), to: (u32, u32)) -> SleepEvent {
        SleepEvent::new(
            format!("s-{d}-{}{}", from.0, from.1),
            Subject::A,
            at(d, from.0, from.1),
            Some(at(d, to.0, to.1)),
        )
    }

    fn feed(ts: Timestamp) -> FeedEvent {
        FeedEvent::bottle(format!("f-{ts}"), Subject::A, ts, 130.0)
    }

    fn analyze(feeds: &[FeedEvent], sleeps: &[SleepEvent], now: Timestamp) -> SleepAnalysis {
        let profile = Profile::default_a();
        let config = EngineConfig::default();
        SleepAnalyzer::new(&profile, &config).analyze(feeds, sleeps, now)
    }

    #[test]
    fn test_nap_classification() {
        let config = EngineConfig::default();
        assert!(is_nap(&nap(10, (13, 0), (14, 0)), &config));
        assert!(!is_nap(&nap(10, (19, 30), (23, 0)), &config));
        assert!(is_bedtime_sleep(&nap(10, (19, 30), (23, 0)), &config));
        assert!(!is_nap(&nap(10, (2, 0), (4, 0)), &config));
        assert!(!is_bedtime_sleep(&nap(10, (2, 0), (4, 0)), &config));
    }

    #[test]
    fn test_daily_totals() {
        let sleeps = vec![
            nap(9, (20, 0), (23, 50)),
            nap(10, (9, 15), (10, 15)),
            nap(10, (13, 0), (14, 30)),
        ];
        let analysis = analyze(&[], &sleeps, at(10, 15, 0));
        assert_eq!(analysis.naps_today, 2);
        assert_eq!(analysis.nap_minutes_today, 150.0);
        assert_eq!(analysis.last_night_minutes, Some(230.0));
        assert_eq!(analysis.last_wake, Some(at(10, 14, 30)));
        assert!(!analysis.is_sleeping);
    }

    #[test]
    fn test_inter_nap_gap_strategy() {
        let mut sleeps = Vec::new();
        for d in 7..10 {
            sleeps.push(nap(d, (9, 0), (10, 0)));
            sleeps.push(nap(d, (12, 30), (13, 30)));
        }
        sleeps.push(nap(10, (9, 0), (10, 0)));
        let analysis = analyze(&[], &sleeps, at(10, 11, 0));
        let next = analysis.next_nap.unwrap();
        assert_eq!(next.strategy, NapStrategy::InterNapGap);
        assert_eq!(next.at, at(10, 12, 30));
    }

    #[test]
    fn test_wake_window_strategy() {
        let sleeps = vec![nap(10, (9, 0), (10, 0))];
        let analysis = analyze(&[], &sleeps, at(10, 11, 0));
        let next = analysis.next_nap.unwrap();
        assert_eq!(next.strategy, NapStrategy::WakeWindow);
        // (90 + 150) / 2 = 120 min after waking
        assert_eq!(next.at, at(10, 12, 0));
    }

    #[test]
    fn test_feed_latency_strategy() {
        let mut feeds = Vec::new();
        let mut sleeps = Vec::new();
        for d in 7..10 {
            feeds.push(feed(at(d, 7, 0)));
            sleeps.push(nap(d, (8, 0), (9, 0)));
        }
        feeds.push(feed(at(10, 7, 0)));
        let analysis = analyze(&feeds, &sleeps, at(10, 7, 30));
        let next = analysis.next_nap.unwrap();
        assert_eq!(next.strategy, NapStrategy::FeedLatency);
        assert_eq!(next.at, at(10, 8, 0));
    }

    #[test]
    fn test_default_window_strategy() {
        let analysis = analyze(&[], &[], at(10, 8, 0));
        let next = analysis.next_nap.unwrap();
        assert_eq!(next.strategy, NapStrategy::DefaultWindow);
        assert_eq!(next.at, at(10, 9, 45));

        // Midpoint already passed: pulled to now + 15 min
        let late = analyze(&[], &[], at(10, 10, 0)).next_nap.unwrap();
        assert_eq!(late.at, at(10, 10, 15));
    }

    #[test]
    fn test_no_prediction_while_sleeping() {
        let sleeps = vec![SleepEvent::new("s1", Subject::A, at(10, 13, 0), None)];
        let analysis = analyze(&[], &sleeps, at(10, 13, 30));
        assert!(analysis.is_sleeping);
        assert!(analysis.next_nap.is_none());
        // Bedtime is still forecast during a nap
        assert!(analysis.bedtime.is_some());
    }

    #[test]
    fn test_default_bedtime() {
        let analysis = analyze(&[], &[], at(10, 12, 0));
        let bedtime = analysis.bedtime.unwrap();
        assert!(!bedtime.data_driven);
        assert_eq!(bedtime.at, at(10, 19, 45));
        assert_eq!(bedtime.expected_wake, at(11, 4, 45));
        assert!(bedtime.adjustments.is_empty());
    }

    #[test]
    fn test_bedtime_from_history() {
        let sleeps: Vec<SleepEvent> = (6..10)
            .map(|d| {
                SleepEvent::new(
                    format!("night-{d}"),
                    Subject::A,
                    at(d, 20, 0),
                    Some(at(d + 1, 6, 0)),
                )
            })
            .collect();
        let analysis = analyze(&[], &sleeps, at(10, 12, 0));
        let bedtime = analysis.bedtime.unwrap();
        assert!(bedtime.data_driven);
        assert_eq!(bedtime.at, at(10, 20, 0));
        assert_eq!(bedtime.night_duration_minutes, 600.0);
    }

    #[test]
    fn test_bedtime_pulled_by_nap_deficit() {
        let sleeps = vec![nap(10, (10, 0), (11, 0)), nap(10, (14, 0), (15, 30))];
        let analysis = analyze(&[], &sleeps, at(10, 17, 40));
        assert!(analysis.next_nap.is_none());
        let bedtime = analysis.bedtime.unwrap();
        // 210 expected - 150 slept = 60 deficit -> 30 min earlier
        assert_eq!(bedtime.at, at(10, 19, 15));
        assert_eq!(bedtime.adjustments[0].rule, "SLEEP_DEFICIT");
    }

    #[test]
    fn test_deficit_pull_capped() {
        let sleeps = vec![nap(10, (10, 0), (10, 10)), nap(10, (15, 0), (15, 20))];
        let analysis = analyze(&[], &sleeps, at(10, 17, 40));
        assert!(analysis.next_nap.is_none());
        let bedtime = analysis.bedtime.unwrap();
        // 210 - 30 = 180 deficit, half is 90, capped at 60
        assert_eq!(bedtime.at, at(10, 18, 45));
        assert_eq!(bedtime.adjustments.len(), 1);
        assert_eq!(bedtime.adjustments[0].rule, "SLEEP_DEFICIT");
        assert_eq!(bedtime.adjustments[0].factor, -60.0);
    }

    #[test]
    fn test_no_bedtime_correction_while_naps_remain() {
        let sleeps = vec![nap(10, (10, 0), (10, 10))];
        let analysis = analyze(&[], &sleeps, at(10, 11, 0));
        assert_eq!(analysis.next_nap.unwrap().at, at(10, 12, 10));
        let bedtime = analysis.bedtime.unwrap();
        assert_eq!(bedtime.at, at(10, 19, 45));
        assert!(bedtime.adjustments.is_empty());
    }

    #[test]
    fn test_bedtime_capped_by_wake_window() {
        let sleeps = vec![nap(10, (10, 0), (11, 0)), nap(10, (13, 0), (14, 0))];
        let analysis = analyze(&[], &sleeps, at(10, 17, 40));
        let bedtime = analysis.bedtime.unwrap();
        assert_eq!(bedtime.at, at(10, 18, 0));
        assert!(bedtime.adjustments.iter().any(|a| a.rule == "WAKE_WINDOW_CAP"));
    }

    #[test]
    fn test_bedtime_suppressed_after_it_passed() {
        let analysis = analyze(&[], &[], at(10, 21, 0));
        assert!(analysis.bedtime.is_none());
    }
}
