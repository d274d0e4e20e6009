//! Static per-subject profiles
//!
//! A profile carries the calibrated baselines used whenever the logged history
//! is too thin to speak for itself: overall volume and interval statistics,
//! the five time-of-day slots, fixed adjustment factors and sleep defaults.

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::types::{SlotId, Subject};

/// Summary statistics of a baseline distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub p10: f64,
    pub p90: f64,
}

/// Static baseline for one time-of-day slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: SlotId,
    pub mean_volume_ml: f64,
    pub std_volume_ml: f64,
    /// Typical interval after a feed in this slot (minutes)
    pub interval_minutes: f64,
    /// Spread of that interval (minutes)
    #[serde(default = "default_interval_std")]
    pub interval_std_minutes: f64,
    /// Slot where the subject usually takes its largest feeds
    #[serde(default)]
    pub peak: bool,
}

fn default_interval_std() -> f64 {
    35.0
}

impl TimeSlot {
    pub fn covers_hour(&self, hour: u32) -> bool {
        SlotId::for_hour(hour) == self.id
    }
}

/// Fixed multiplicative adjustments applied by the predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    pub interval_multiplier: f64,
    pub evening_interval_factor: f64,
    pub evening_volume_factor: f64,
    pub night_volume_factor: f64,
    pub midday_volume_factor: f64,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            interval_multiplier: 1.0,
            evening_interval_factor: 1.0,
            evening_volume_factor: 1.0,
            night_volume_factor: 1.0,
            midday_volume_factor: 1.0,
        }
    }
}

/// Clock-time range of a customary nap (minutes since midnight)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NapWindow {
    pub start_minutes: f64,
    pub end_minutes: f64,
}

impl NapWindow {
    pub fn midpoint(&self) -> f64 {
        (self.start_minutes + self.end_minutes) / 2.0
    }

    pub fn contains(&self, clock_minutes: f64) -> bool {
        clock_minutes >= self.start_minutes && clock_minutes < self.end_minutes
    }
}

/// Sleep defaults used when history is insufficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepBaseline {
    pub wake_window_min_minutes: f64,
    pub wake_window_max_minutes: f64,
    /// Longest acceptable wake time before bedtime
    pub max_wake_window_minutes: f64,
    /// Default bedtime (minutes since midnight)
    pub bedtime_minutes: f64,
    pub night_duration_minutes: f64,
    /// Expected total of daytime naps
    pub expected_day_sleep_minutes: f64,
    pub nap_windows: Vec<NapWindow>,
}

/// Static profile of one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub subject: Subject,
    pub name: String,
    /// Feed volume baseline (ml)
    pub volume: BaselineStats,
    /// Inter-feed interval baseline (minutes)
    pub interval: BaselineStats,
    /// Slots in `SlotId::ALL` order
    pub slots: [TimeSlot; 5],
    #[serde(default)]
    pub adjustments: Adjustments,
    pub sleep: SleepBaseline,
}

impl Profile {
    /// Baseline for a slot
    pub fn slot(&self, id: SlotId) -> &TimeSlot {
        &self.slots[id.index()]
    }

    /// Baseline of the slot covering `hour`
    pub fn slot_for_hour(&self, hour: u32) -> &TimeSlot {
        self.slot(SlotId::for_hour(hour))
    }

    /// Slot flagged as the subject's peak, if any
    pub fn peak_slot(&self) -> Option<SlotId> {
        self.slots.iter().find(|s| s.peak).map(|s| s.id)
    }

    /// Default profile of subject A (the larger eater, spaced feeds)
    pub fn default_a() -> Self {
        Self {
            subject: Subject::A,
            name: "Subject A".to_string(),
            volume: BaselineStats {
                mean: 132.0,
                std: 24.0,
                median: 130.0,
                p10: 95.0,
                p90: 165.0,
            },
            interval: BaselineStats {
                mean: 195.0,
                std: 40.0,
                median: 190.0,
                p10: 145.0,
                p90: 265.0,
            },
            slots: [
                slot(SlotId::Morning, 140.0, 20.0, 180.0, 30.0, false),
                slot(SlotId::Midday, 125.0, 20.0, 195.0, 30.0, false),
                slot(SlotId::Afternoon, 120.0, 22.0, 200.0, 35.0, false),
                slot(SlotId::Evening, 145.0, 25.0, 170.0, 30.0, true),
                slot(SlotId::Night, 120.0, 25.0, 240.0, 45.0, false),
            ],
            adjustments: Adjustments {
                interval_multiplier: 1.0,
                evening_interval_factor: 0.95,
                evening_volume_factor: 1.05,
                night_volume_factor: 0.95,
                midday_volume_factor: 1.0,
            },
            sleep: SleepBaseline {
                wake_window_min_minutes: 90.0,
                wake_window_max_minutes: 150.0,
                max_wake_window_minutes: 240.0,
                bedtime_minutes: 19.0 * 60.0 + 45.0,
                night_duration_minutes: 540.0,
                expected_day_sleep_minutes: 210.0,
                nap_windows: default_nap_windows(),
            },
        }
    }

    /// Default profile of subject B (smaller, more frequent feeds)
    pub fn default_b() -> Self {
        Self {
            subject: Subject::B,
            name: "Subject B".to_string(),
            volume: BaselineStats {
                mean: 115.0,
                std: 22.0,
                median: 115.0,
                p10: 85.0,
                p90: 145.0,
            },
            interval: BaselineStats {
                mean: 180.0,
                std: 38.0,
                median: 175.0,
                p10: 135.0,
                p90: 245.0,
            },
            slots: [
                slot(SlotId::Morning, 125.0, 18.0, 170.0, 30.0, true),
                slot(SlotId::Midday, 110.0, 18.0, 180.0, 30.0, false),
                slot(SlotId::Afternoon, 105.0, 20.0, 185.0, 35.0, false),
                slot(SlotId::Evening, 120.0, 22.0, 160.0, 30.0, false),
                slot(SlotId::Night, 105.0, 22.0, 225.0, 45.0, false),
            ],
            adjustments: Adjustments {
                interval_multiplier: 0.97,
                evening_interval_factor: 0.92,
                evening_volume_factor: 1.0,
                night_volume_factor: 0.92,
                midday_volume_factor: 1.05,
            },
            sleep: SleepBaseline {
                wake_window_min_minutes: 80.0,
                wake_window_max_minutes: 140.0,
                max_wake_window_minutes: 225.0,
                bedtime_minutes: 19.0 * 60.0 + 30.0,
                night_duration_minutes: 555.0,
                expected_day_sleep_minutes: 225.0,
                nap_windows: default_nap_windows(),
            },
        }
    }

    pub fn default_for(subject: Subject) -> Self {
        match subject {
            Subject::A => Self::default_a(),
            Subject::B => Self::default_b(),
        }
    }

    /// Check that baselines are usable by the predictor
    pub fn validate(&self) -> Result<(), ComputeError> {
        let fail = |reason: String| ComputeError::InvalidProfile {
            subject: self.subject.as_str().to_string(),
            reason,
        };
        for (i, s) in self.slots.iter().enumerate() {
            if s.id != SlotId::ALL[i] {
                return Err(fail(format!(
                    "slot {} is out of order (expected {})",
                    s.id.as_str(),
                    SlotId::ALL[i].as_str()
                )));
            }
            if !(s.mean_volume_ml > 0.0 && s.interval_minutes > 0.0) {
                return Err(fail(format!("slot {} has non-positive baselines", s.id.as_str())));
            }
            if s.std_volume_ml < 0.0 || s.interval_std_minutes < 0.0 {
                return Err(fail(format!("slot {} has a negative spread", s.id.as_str())));
            }
        }
        if !(self.interval.p90 > 0.0 && self.interval.median > 0.0) {
            return Err(fail("interval baseline must be positive".to_string()));
        }
        let sleep = &self.sleep;
        if sleep.wake_window_min_minutes > sleep.wake_window_max_minutes {
            return Err(fail("wake window bounds are inverted".to_string()));
        }
        if !(0.0..24.0 * 60.0).contains(&sleep.bedtime_minutes) {
            return Err(fail("bedtime must be a clock time".to_string()));
        }
        if sleep.nap_windows.iter().any(|w| w.start_minutes >= w.end_minutes) {
            return Err(fail("nap window ends before it starts".to_string()));
        }
        Ok(())
    }
}

fn slot(id: SlotId, mean: f64, std: f64, interval: f64, interval_std: f64, peak: bool) -> TimeSlot {
    TimeSlot {
        id,
        mean_volume_ml: mean,
        std_volume_ml: std,
        interval_minutes: interval,
        interval_std_minutes: interval_std,
        peak,
    }
}

fn default_nap_windows() -> Vec<NapWindow> {
    vec![
        NapWindow {
            start_minutes: 9.0 * 60.0,
            end_minutes: 10.0 * 60.0 + 30.0,
        },
        NapWindow {
            start_minutes: 12.0 * 60.0 + 30.0,
            end_minutes: 14.0 * 60.0 + 30.0,
        },
        NapWindow {
            start_minutes: 16.0 * 60.0,
            end_minutes: 17.0 * 60.0 + 15.0,
        },
    ]
}

/// Profiles of both subjects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub a: Profile,
    pub b: Profile,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self {
            a: Profile::default_a(),
            b: Profile::default_b(),
        }
    }
}

impl ProfileSet {
    pub fn get(&self, subject: Subject) -> &Profile {
        match subject {
            Subject::A => &self.a,
            Subject::B => &self.b,
        }
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        self.a.validate()?;
        self.b.validate()?;
        if self.a.subject != Subject::A || self.b.subject != Subject::B {
            return Err(ComputeError::InvalidProfile {
                subject: "a/b".to_string(),
                reason: "profiles are assigned to the wrong subjects".to_string(),
            });
        }
        Ok(())
    }

    /// Load profiles from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let profiles: ProfileSet = serde_json::from_str(json)?;
        profiles.validate()?;
        Ok(profiles)
    }

    /// Serialize profiles to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
