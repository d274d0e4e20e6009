//! Feed / sleep correlation insights
//!
//! A fixed catalog of paired probes. Each probe pairs an explanatory quantity
//! `x` with an outcome `y`, splits the observations at the median of `x` and
//! reports the weighted difference of `y` between the two halves when it is
//! large enough to mention.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::clock::{clock_minutes, day_of_year, day_start, format_clock, minutes_between};
use crate::config::EngineConfig;
use crate::recency::{config_weight, median, weighted_avg, within_window, Weighted};
use crate::sleep::{is_bedtime_sleep, is_nap};
use crate::types::{FeedEvent, SleepEvent, SlotId, Timestamp};

/// `(x, y, recency weight)`
pub type Observation = (f64, f64, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Ml,
    Minutes,
    /// Minutes since midnight, rendered as a clock time
    Clock,
    Count,
}

impl Unit {
    fn render_value(self, value: f64) -> String {
        match self {
            Unit::Ml => format!("{:.0} ml", value),
            Unit::Minutes => format!("{:.0} min", value),
            Unit::Clock => format_clock(value),
            Unit::Count => format!("{:.0}", value),
        }
    }

    fn render_delta(self, delta: f64) -> String {
        match self {
            Unit::Ml => format!("{:.0} ml", delta),
            Unit::Count => format!("{:.1}", delta),
            Unit::Minutes | Unit::Clock => format!("{:.0} min", delta),
        }
    }
}

/// An emitted correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSleepInsight {
    pub id: String,
    pub title: String,
    pub message: String,
    /// Weighted mean of y above the split minus below it
    pub difference: f64,
    pub split: f64,
    pub low_mean: f64,
    pub high_mean: f64,
    pub samples: usize,
    pub x_unit: Unit,
    pub y_unit: Unit,
    /// Slots during which the insight is worth surfacing
    pub slots: Vec<SlotId>,
}

/// Windowed history shared by the probes
struct ProbeContext<'a> {
    config: &'a EngineConfig,
    feeds: &'a [FeedEvent],
    completed: Vec<&'a SleepEvent>,
    now: Timestamp,
}

impl<'a> ProbeContext<'a> {
    /// Windows the history and keeps the sleeps already over at `now`
    fn new(feeds: &'a [FeedEvent], sleeps: &'a [SleepEvent], config: &'a EngineConfig, now: Timestamp) -> Self {
        Self {
            config,
            feeds: within_window(feeds, now, config.window_days),
            completed: within_window(sleeps, now, config.window_days)
                .iter()
                .filter(|s| matches!(s.end, Some(end) if end <= now))
                .collect(),
            now,
        }
    }

    fn weight(&self, ts: Timestamp) -> f64 {
        config_weight(self.config, ts, self.now)
    }

    fn naps(&self) -> impl Iterator<Item = &'a SleepEvent> + '_ {
        self.completed.iter().copied().filter(move |s| is_nap(s, self.config))
    }

    fn nights(&self) -> impl Iterator<Item = &'a SleepEvent> + '_ {
        let min = self.config.sleep.min_night_minutes;
        self.completed.iter().copied().filter(move |s| {
            is_bedtime_sleep(s, self.config) && s.duration_minutes().map_or(false, |d| d > min)
        })
    }

    fn household_day(&self, ts: Timestamp) -> Timestamp {
        day_start(ts, self.config.day_boundary_hour)
    }

    /// Naps of the same household day that ended before `ts`
    fn naps_before(&self, ts: Timestamp) -> Vec<&'a SleepEvent> {
        let day = self.household_day(ts);
        self.naps()
            .filter(|n| self.household_day(n.start) == day && n.end.map_or(false, |e| e <= ts))
            .collect()
    }

    fn last_feed_before(&self, ts: Timestamp) -> Option<&'a FeedEvent> {
        let idx = self.feeds.partition_point(|f| f.timestamp <= ts);
        self.feeds.get(idx.checked_sub(1)?)
    }

    fn first_feed_after(&self, ts: Timestamp) -> Option<&'a FeedEvent> {
        let idx = self.feeds.partition_point(|f| f.timestamp <= ts);
        self.feeds.get(idx)
    }

    fn feeds_between(&self, from: Timestamp, to: Timestamp) -> &'a [FeedEvent] {
        let lo = self.feeds.partition_point(|f| f.timestamp < from);
        let hi = self.feeds.partition_point(|f| f.timestamp <= to);
        if lo >= hi {
            return &[];
        }
        &self.feeds[lo..hi]
    }
}

struct Probe {
    id: &'static str,
    title: &'static str,
    x_unit: Unit,
    y_unit: Unit,
    /// Minimum |difference| worth reporting, in y units
    threshold: f64,
    slots: &'static [SlotId],
    pair: fn(&ProbeContext<'_>) -> Vec<Observation>,
    /// `{split}`, `{diff}` and `{trend}` are substituted
    template: &'static str,
}

const DAYTIME: &[SlotId] = &[SlotId::Morning, SlotId::Midday, SlotId::Afternoon];
const LATE_DAY: &[SlotId] = &[SlotId::Afternoon, SlotId::Evening];
const ALL_SLOTS: &[SlotId] = &SlotId::ALL;

static PROBES: &[Probe] = &[
    Probe {
        id: "PRE_NAP_FEED_NAP_LENGTH",
        title: "Biberon avant la sieste",
        x_unit: Unit::Ml,
        y_unit: Unit::Minutes,
        threshold: 10.0,
        slots: DAYTIME,
        pair: pre_nap_feed_vs_nap_length,
        template: "Quand le biberon avant la sieste dépasse {split}, la sieste dure {diff} de {trend}.",
    },
    Probe {
        id: "EVENING_VOLUME_NIGHT_STRETCH",
        title: "Volume du soir",
        x_unit: Unit::Ml,
        y_unit: Unit::Minutes,
        threshold: 20.0,
        slots: &[SlotId::Evening],
        pair: evening_volume_vs_first_stretch,
        template: "Au-delà de {split} bus le soir, la première partie de nuit dure {diff} de {trend}.",
    },
    Probe {
        id: "CLUSTER_NEXT_SLEEP",
        title: "Repas groupés et sommeil",
        x_unit: Unit::Count,
        y_unit: Unit::Minutes,
        threshold: 15.0,
        slots: LATE_DAY,
        pair: cluster_vs_next_sleep,
        template: "Après plus de {split} repas en 3 h, le sommeil suivant dure {diff} de {trend}.",
    },
    Probe {
        id: "WAKE_WINDOW_NAP_LENGTH",
        title: "Fenêtre d'éveil",
        x_unit: Unit::Minutes,
        y_unit: Unit::Minutes,
        threshold: 10.0,
        slots: DAYTIME,
        pair: wake_window_vs_nap_length,
        template: "Après plus de {split} d'éveil, la sieste dure {diff} de {trend}.",
    },
    Probe {
        id: "NAP_LENGTH_NEXT_FEED_VOLUME",
        title: "Sieste et appétit",
        x_unit: Unit::Minutes,
        y_unit: Unit::Ml,
        threshold: 10.0,
        slots: &[SlotId::Midday, SlotId::Afternoon],
        pair: nap_length_vs_next_feed_volume,
        template: "Après une sieste de plus de {split}, le biberon suivant fait {diff} de {trend}.",
    },
    Probe {
        id: "POST_NAP_LATENCY_VOLUME",
        title: "Délai après la sieste",
        x_unit: Unit::Minutes,
        y_unit: Unit::Ml,
        threshold: 10.0,
        slots: &[SlotId::Midday, SlotId::Afternoon],
        pair: post_nap_latency_vs_volume,
        template: "Quand le repas arrive plus de {split} après le réveil, il fait {diff} de {trend}.",
    },
    Probe {
        id: "LAST_FEED_GAP_NIGHT_LENGTH",
        title: "Dernier repas avant la nuit",
        x_unit: Unit::Minutes,
        y_unit: Unit::Minutes,
        threshold: 20.0,
        slots: &[SlotId::Evening],
        pair: last_feed_gap_vs_night_length,
        template: "Quand le dernier repas précède le coucher de plus de {split}, la nuit dure {diff} de {trend}.",
    },
    Probe {
        id: "DAY_NAPS_NIGHT_LENGTH",
        title: "Siestes et nuit",
        x_unit: Unit::Minutes,
        y_unit: Unit::Minutes,
        threshold: 20.0,
        slots: LATE_DAY,
        pair: day_naps_vs_night_length,
        template: "Au-delà de {split} de siestes dans la journée, la nuit dure {diff} de {trend}.",
    },
    Probe {
        id: "MORNING_VOLUME_FIRST_NAP",
        title: "Volume du matin",
        x_unit: Unit::Ml,
        y_unit: Unit::Minutes,
        threshold: 10.0,
        slots: &[SlotId::Morning],
        pair: morning_volume_vs_first_nap,
        template: "Au-delà de {split} bus le matin, la première sieste dure {diff} de {trend}.",
    },
    Probe {
        id: "BEDTIME_NIGHT_LENGTH",
        title: "Heure du coucher",
        x_unit: Unit::Clock,
        y_unit: Unit::Minutes,
        threshold: 20.0,
        slots: &[SlotId::Evening, SlotId::Night],
        pair: bedtime_vs_night_length,
        template: "Avec un coucher après {split}, la nuit dure {diff} de {trend}.",
    },
    Probe {
        id: "NIGHT_LENGTH_MORNING_VOLUME",
        title: "Nuit et premier biberon",
        x_unit: Unit::Minutes,
        y_unit: Unit::Ml,
        threshold: 10.0,
        slots: &[SlotId::Morning],
        pair: night_length_vs_morning_volume,
        template: "Après une nuit de plus de {split}, le premier biberon fait {diff} de {trend}.",
    },
    Probe {
        id: "NAP_COUNT_NIGHT_LENGTH",
        title: "Nombre de siestes",
        x_unit: Unit::Count,
        y_unit: Unit::Minutes,
        threshold: 20.0,
        slots: &[SlotId::Evening],
        pair: nap_count_vs_night_length,
        template: "Avec plus de {split} siestes dans la journée, la nuit dure {diff} de {trend}.",
    },
    Probe {
        id: "FEED_SIZE_NEXT_INTERVAL",
        title: "Volume et intervalle",
        x_unit: Unit::Ml,
        y_unit: Unit::Minutes,
        threshold: 15.0,
        slots: ALL_SLOTS,
        pair: feed_size_vs_next_interval,
        template: "Après un biberon de plus de {split}, le repas suivant arrive {diff} {trend} tard.",
    },
    Probe {
        id: "LAST_NAP_END_BEDTIME",
        title: "Fin de la dernière sieste",
        x_unit: Unit::Clock,
        y_unit: Unit::Clock,
        threshold: 15.0,
        slots: LATE_DAY,
        pair: last_nap_end_vs_bedtime,
        template: "Quand la dernière sieste finit après {split}, le coucher a lieu {diff} {trend} tard.",
    },
    Probe {
        id: "NIGHT_FEED_RESETTLE",
        title: "Repas de nuit",
        x_unit: Unit::Ml,
        y_unit: Unit::Minutes,
        threshold: 15.0,
        slots: &[SlotId::Night],
        pair: night_feed_vs_resettle,
        template: "Après un repas de nuit de plus de {split}, le rendormissement dure {diff} de {trend}.",
    },
];

/// Insights whose difference clears the probe's threshold, in catalog order
pub fn compute_insights(
    feeds: &[FeedEvent],
    sleeps: &[SleepEvent],
    config: &EngineConfig,
    now: Timestamp,
) -> Vec<FeedSleepInsight> {
    let ctx = ProbeContext::new(feeds, sleeps, config, now);
    PROBES
        .iter()
        .filter_map(|probe| evaluate(probe, (probe.pair)(&ctx), config))
        .collect()
}

/// Median split of `observations`; `None` when samples are too thin or the
/// difference is below the probe threshold
fn evaluate(probe: &Probe, observations: Vec<Observation>, config: &EngineConfig) -> Option<FeedSleepInsight> {
    let observations: Vec<Observation> = observations
        .into_iter()
        .filter(|(x, y, w)| x.is_finite() && y.is_finite() && *w > 0.0)
        .collect();
    if observations.len() < config.insights.min_samples {
        return None;
    }
    let xs: Vec<f64> = observations.iter().map(|o| o.0).collect();
    let split = median(&xs);
    let (low, high): (Vec<Observation>, Vec<Observation>) =
        observations.iter().partition(|(x, _, _)| *x <= split);
    let per_side = config.insights.min_per_side;
    if low.len() < per_side || high.len() < per_side {
        return None;
    }

    let outcome = |side: &[Observation]| -> f64 {
        let ys: Vec<Weighted> = side.iter().map(|(_, y, w)| (*y, *w)).collect();
        weighted_avg(&ys)
    };
    let low_mean = outcome(&low);
    let high_mean = outcome(&high);
    let difference = high_mean - low_mean;
    if difference.abs() < probe.threshold {
        return None;
    }
    tracing::debug!(probe = probe.id, difference, "insight emitted");

    let trend = if difference > 0.0 { "plus" } else { "moins" };
    let message = probe
        .template
        .replace("{split}", &probe.x_unit.render_value(split))
        .replace("{diff}", &probe.y_unit.render_delta(difference.abs()))
        .replace("{trend}", trend);

    Some(FeedSleepInsight {
        id: probe.id.to_string(),
        title: probe.title.to_string(),
        message,
        difference,
        split,
        low_mean,
        high_mean,
        samples: observations.len(),
        x_unit: probe.x_unit,
        y_unit: probe.y_unit,
        slots: probe.slots.to_vec(),
    })
}

/// Pick the insight to surface now
///
/// Only insights relevant to the current slot qualify; the choice rotates with
/// the day of year so the same insight is not shown every day.
pub fn contextual_insight(insights: &[FeedSleepInsight], now: Timestamp) -> Option<&FeedSleepInsight> {
    let slot = SlotId::for_timestamp(now);
    let relevant: Vec<&FeedSleepInsight> = insights.iter().filter(|i| i.slots.contains(&slot)).collect();
    if relevant.is_empty() {
        return None;
    }
    let idx = (day_of_year(now) as usize + slot.index()) % relevant.len();
    Some(relevant[idx])
}

/// Bedtime as minutes, keeping post-midnight bedtimes after evening ones
fn bedtime_clock(ts: Timestamp) -> f64 {
    let minutes = clock_minutes(ts);
    if minutes < 12.0 * 60.0 {
        minutes + 24.0 * 60.0
    } else {
        minutes
    }
}

fn pre_nap_feed_vs_nap_length(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let max = ctx.config.sleep.max_feed_to_nap_minutes;
    ctx.naps()
        .filter_map(|nap| {
            let feed = ctx.last_feed_before(nap.start).filter(|f| f.has_volume())?;
            if minutes_between(feed.timestamp, nap.start) > max {
                return None;
            }
            Some((feed.volume_ml, nap.duration_minutes()?, ctx.weight(nap.start)))
        })
        .collect()
}

fn evening_volume_vs_first_stretch(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let (evening_start, _) = SlotId::Evening.hours();
    ctx.nights()
        .filter_map(|night| {
            let from = night.start.date().and_hms_opt(evening_start, 0, 0)?;
            let volume: f64 = ctx.feeds_between(from, night.start).iter().map(|f| f.volume_ml).sum();
            if volume <= 0.0 {
                return None;
            }
            let end = night.end?;
            let wake = ctx
                .first_feed_after(night.start)
                .map(|f| f.timestamp.min(end))
                .unwrap_or(end);
            Some((volume, minutes_between(night.start, wake), ctx.weight(night.start)))
        })
        .collect()
}

fn cluster_vs_next_sleep(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let window = Duration::minutes((ctx.config.patterns.cluster_window_hours * 60.0).round() as i64);
    ctx.completed
        .iter()
        .filter_map(|sleep| {
            let count = ctx.feeds_between(sleep.start - window, sleep.start).len();
            Some((count as f64, sleep.duration_minutes()?, ctx.weight(sleep.start)))
        })
        .collect()
}

fn wake_window_vs_nap_length(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    // Longer gaps are tracking holes
    let max = ctx.config.max_interval_minutes;
    ctx.naps()
        .filter_map(|nap| {
            let woke = ctx
                .completed
                .iter()
                .filter_map(|s| s.end)
                .filter(|end| *end <= nap.start)
                .max()?;
            let awake = minutes_between(woke, nap.start);
            if awake > max {
                return None;
            }
            Some((awake, nap.duration_minutes()?, ctx.weight(nap.start)))
        })
        .collect()
}

fn nap_length_vs_next_feed_volume(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    post_nap_feeds(ctx)
        .into_iter()
        .filter_map(|(nap, feed)| Some((nap.duration_minutes()?, feed.volume_ml, ctx.weight(nap.start))))
        .collect()
}

fn post_nap_latency_vs_volume(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    post_nap_feeds(ctx)
        .into_iter()
        .filter_map(|(nap, feed)| {
            let latency = minutes_between(nap.end?, feed.timestamp);
            Some((latency, feed.volume_ml, ctx.weight(nap.start)))
        })
        .collect()
}

/// Each nap with the first measured feed following it
fn post_nap_feeds<'a>(ctx: &ProbeContext<'a>) -> Vec<(&'a SleepEvent, &'a FeedEvent)> {
    let window = ctx.config.post_nap_feed_window_minutes;
    ctx.naps()
        .filter_map(|nap| {
            let end = nap.end?;
            let feed = ctx.first_feed_after(end).filter(|f| f.has_volume())?;
            (minutes_between(end, feed.timestamp) <= window).then_some((nap, feed))
        })
        .collect()
}

fn last_feed_gap_vs_night_length(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let max = ctx.config.sleep.max_feed_to_nap_minutes;
    ctx.nights()
        .filter_map(|night| {
            let feed = ctx.last_feed_before(night.start)?;
            let gap = minutes_between(feed.timestamp, night.start);
            if gap > max {
                return None;
            }
            Some((gap, night.duration_minutes()?, ctx.weight(night.start)))
        })
        .collect()
}

fn day_naps_vs_night_length(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    ctx.nights()
        .filter_map(|night| {
            let naps = ctx.naps_before(night.start);
            if naps.is_empty() {
                return None;
            }
            let total: f64 = naps.iter().filter_map(|n| n.duration_minutes()).sum();
            Some((total, night.duration_minutes()?, ctx.weight(night.start)))
        })
        .collect()
}

fn nap_count_vs_night_length(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    ctx.nights()
        .filter_map(|night| {
            let count = ctx.naps_before(night.start).len();
            if count == 0 {
                return None;
            }
            Some((count as f64, night.duration_minutes()?, ctx.weight(night.start)))
        })
        .collect()
}

fn morning_volume_vs_first_nap(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let (from_hour, to_hour) = SlotId::Morning.hours();
    let mut days: Vec<Timestamp> = ctx.naps().map(|n| ctx.household_day(n.start)).collect();
    days.dedup();
    days.into_iter()
        .filter_map(|day| {
            let first_nap = ctx.naps().find(|n| ctx.household_day(n.start) == day)?;
            let from = day.date().and_hms_opt(from_hour, 0, 0)?;
            let to = day.date().and_hms_opt(to_hour, 0, 0)? - Duration::seconds(1);
            let volume: f64 = ctx
                .feeds_between(from, to.min(first_nap.start))
                .iter()
                .map(|f| f.volume_ml)
                .sum();
            if volume <= 0.0 {
                return None;
            }
            Some((volume, first_nap.duration_minutes()?, ctx.weight(first_nap.start)))
        })
        .collect()
}

fn bedtime_vs_night_length(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    ctx.nights()
        .filter_map(|night| Some((bedtime_clock(night.start), night.duration_minutes()?, ctx.weight(night.start))))
        .collect()
}

fn night_length_vs_morning_volume(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let window = ctx.config.post_nap_feed_window_minutes;
    ctx.nights()
        .filter_map(|night| {
            let end = night.end?;
            let feed = ctx.first_feed_after(end).filter(|f| f.has_volume())?;
            if minutes_between(end, feed.timestamp) > window {
                return None;
            }
            Some((night.duration_minutes()?, feed.volume_ml, ctx.weight(end)))
        })
        .collect()
}

fn feed_size_vs_next_interval(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let (min, max) = (ctx.config.min_interval_minutes, ctx.config.max_interval_minutes);
    ctx.feeds
        .windows(2)
        .filter_map(|pair| {
            if !pair[0].has_volume() {
                return None;
            }
            let gap = minutes_between(pair[0].timestamp, pair[1].timestamp);
            (gap >= min && gap <= max).then(|| (pair[0].volume_ml, gap, ctx.weight(pair[0].timestamp)))
        })
        .collect()
}

fn last_nap_end_vs_bedtime(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    ctx.nights()
        .filter_map(|night| {
            let last_end = ctx.naps_before(night.start).iter().filter_map(|n| n.end).max()?;
            Some((clock_minutes(last_end), bedtime_clock(night.start), ctx.weight(night.start)))
        })
        .collect()
}

fn night_feed_vs_resettle(ctx: &ProbeContext<'_>) -> Vec<Observation> {
    let window = ctx.config.min_interval_minutes * 2.0;
    ctx.feeds
        .iter()
        .filter(|f| f.has_volume() && SlotId::for_timestamp(f.timestamp) == SlotId::Night)
        .filter_map(|feed| {
            let sleep = ctx.completed.iter().find(|s| {
                s.start >= feed.timestamp && minutes_between(feed.timestamp, s.start) <= window
            })?;
            Some((feed.volume_ml, sleep.duration_minutes()?, ctx.weight(feed.timestamp)))
        })
        .collect()
}
