// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of SolHash.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Pure decision rules for away-mode auto-control.
//!
//! Nothing in here performs I/O or reads the clock; the engine feeds inputs in and
//! applies the outcome. That keeps every rule, the rate limiter and the latched
//! floor directly testable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Full-charge threshold for the latched floor
pub const FULL_SOC: f64 = 100.0;

/// SOC above which the full-power rule may fire
pub const FULL_POWER_SOC: f64 = 99.0;

/// Thresholds used by the rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Below this SOC the device is stopped
    pub emergency_soc: f64,
    /// Solar power that counts as "surplus" (W)
    pub max_pv_power_w: f64,
    /// SOC above which the conservative tier applies
    pub high_soc_threshold: f64,
    /// Conservative tier (%)
    pub high_soc_pct: u8,
    /// Minimum SOC to start the device after sunset
    pub after_sunset_min_soc: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            emergency_soc: 30.0,
            max_pv_power_w: 3600.0,
            high_soc_threshold: 90.0,
            high_soc_pct: 90,
            after_sunset_min_soc: 40.0,
        }
    }
}

/// Which rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Emergency,
    FullPower,
    Conservative,
    PostSunsetStartup,
    NormalDischarge,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Emergency => "Emergency: battery below cutoff, device stopped",
            Self::FullPower => "Full power: battery full with solar surplus",
            Self::Conservative => "Conservative: battery high, solar below threshold",
            Self::PostSunsetStartup => "After sunset: starting device at battery tier",
            Self::NormalDischarge => "Normal: power follows battery tier",
        };
        write!(f, "{s}")
    }
}

/// One evaluation's inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleInputs {
    pub soc_percent: f64,
    pub pv_power_w: f64,
    pub past_sunset: bool,
    pub device_off: bool,
    pub latched_floor: Option<u8>,
}

/// Rule outcome before rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub rule: Rule,
    pub percent: u8,
    /// Full charge reached: the floor must be cleared
    pub clear_floor: bool,
}

/// Map SOC to a decile power tier: 0 below `cutoff`, otherwise SOC rounded up to
/// the next multiple of 10 (capped at 100).
pub fn decile_tier(soc_percent: f64, cutoff: f64) -> u8 {
    if soc_percent.is_nan() || soc_percent < cutoff || soc_percent <= 0.0 {
        return 0;
    }
    let tier = ((soc_percent / 10.0).ceil() * 10.0).min(100.0);
    // tier is a whole multiple of 10 in 0..=100
    tier as u8
}

/// Evaluate the away-mode rules in priority order; first match wins.
///
/// Every rule except full power is clamped by the latched floor while the
/// battery is below full charge.
pub fn evaluate_rules(thresholds: &RuleThresholds, inputs: &RuleInputs) -> Decision {
    let soc = inputs.soc_percent;
    let clamp = |pct: u8| match inputs.latched_floor {
        Some(floor) if soc < FULL_SOC => pct.min(floor),
        _ => pct,
    };

    if soc < thresholds.emergency_soc {
        return Decision {
            rule: Rule::Emergency,
            percent: 0,
            clear_floor: false,
        };
    }

    if soc >= FULL_SOC || (soc > FULL_POWER_SOC && inputs.pv_power_w > thresholds.max_pv_power_w)
    {
        return Decision {
            rule: Rule::FullPower,
            percent: 100,
            clear_floor: true,
        };
    }

    if soc > thresholds.high_soc_threshold && inputs.pv_power_w < thresholds.max_pv_power_w {
        return Decision {
            rule: Rule::Conservative,
            percent: clamp(thresholds.high_soc_pct.min(100)),
            clear_floor: false,
        };
    }

    let tier = decile_tier(soc, thresholds.emergency_soc);

    if inputs.past_sunset && soc > thresholds.after_sunset_min_soc && inputs.device_off {
        return Decision {
            rule: Rule::PostSunsetStartup,
            percent: clamp(tier),
            clear_floor: false,
        };
    }

    Decision {
        rule: Rule::NormalDischarge,
        percent: clamp(tier),
        clear_floor: false,
    }
}

/// Lowest power committed since the battery was last full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatchedFloor(Option<u8>);

impl LatchedFloor {
    pub fn get(&self) -> Option<u8> {
        self.0
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Record an enqueued intent. Only partial power (1-99%) latches; 0% is an
    /// emergency stop and 100% is full charge.
    pub fn record(&mut self, percent: u8) {
        if percent == 0 || percent >= 100 {
            return;
        }
        self.0 = Some(self.0.map_or(percent, |floor| floor.min(percent)));
    }
}

/// Why an intent was not enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Same target as last enqueue
    Unchanged,
    /// Change smaller than the minimum delta
    BelowDelta { delta: u8, min_delta: u8 },
    /// Too soon after the last enqueue
    TooSoon { remaining_secs: u64 },
    /// Emergency stop already confirmed by device telemetry
    AlreadyStopped,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "target unchanged"),
            Self::BelowDelta { delta, min_delta } => {
                write!(f, "change of {delta}% below minimum {min_delta}%")
            }
            Self::TooSoon { remaining_secs } => {
                write!(f, "rate limited, {remaining_secs}s until next change allowed")
            }
            Self::AlreadyStopped => write!(f, "device already stopped"),
        }
    }
}

/// Gate between computed targets and enqueued commands
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    min_delta_pct: u8,
    last: Option<(u8, DateTime<Utc>)>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, min_delta_pct: u8) -> Self {
        Self {
            min_interval,
            min_delta_pct,
            last: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Last enqueued percent
    pub fn last_percent(&self) -> Option<u8> {
        self.last.map(|(pct, _)| pct)
    }

    pub fn last_at(&self) -> Option<DateTime<Utc>> {
        self.last.map(|(_, at)| at)
    }

    /// Check whether `percent` may be enqueued at `now`.
    ///
    /// Always allowed when nothing was ever enqueued. Otherwise the change must
    /// be at least the minimum delta and `min_interval` must have elapsed.
    pub fn check(&self, percent: u8, now: DateTime<Utc>) -> Result<(), SkipReason> {
        let Some((last_pct, last_at)) = self.last else {
            return Ok(());
        };

        let delta = last_pct.abs_diff(percent);
        if delta == 0 {
            return Err(SkipReason::Unchanged);
        }
        if delta < self.min_delta_pct {
            return Err(SkipReason::BelowDelta {
                delta,
                min_delta: self.min_delta_pct,
            });
        }

        self.check_interval(now)
    }

    /// Interval gate alone, for re-sending a target the device never confirmed
    pub fn check_interval(&self, now: DateTime<Utc>) -> Result<(), SkipReason> {
        let Some((_, last_at)) = self.last else {
            return Ok(());
        };

        let elapsed = (now - last_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed < self.min_interval {
            let remaining = self.min_interval - elapsed;
            return Err(SkipReason::TooSoon {
                remaining_secs: remaining.as_secs().max(1),
            });
        }

        Ok(())
    }

    /// Record an enqueue
    pub fn record(&mut self, percent: u8, now: DateTime<Utc>) {
        self.last = Some((percent, now));
    }

    /// Allow the next change immediately while keeping the last percent
    pub fn reset_timer(&mut self) {
        if let Some((pct, _)) = self.last {
            self.last = Some((pct, DateTime::<Utc>::MIN_UTC));
        }
    }
}
