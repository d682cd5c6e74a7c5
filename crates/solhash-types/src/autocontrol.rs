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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Auto-control operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoControlMode {
    /// Nobody on site: battery protection first
    #[default]
    Away,
    /// Operator on site (not supported by the engine yet)
    Present,
}

impl AutoControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Away => "away",
            Self::Present => "present",
        }
    }
}

impl fmt::Display for AutoControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AutoControlMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "away" => Ok(Self::Away),
            "present" => Ok(Self::Present),
            _ => Err(anyhow::anyhow!(
                "Unknown auto-control mode: '{}'. Supported modes: away, present",
                s
            )),
        }
    }
}

/// Power target produced by the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerIntent {
    /// 0-100
    pub percent: u8,
    /// `percent` of the base capacity
    pub watts: u32,
}

impl PowerIntent {
    pub fn new(percent: u8, base_watts: u32) -> Self {
        let percent = percent.min(100);
        Self {
            percent,
            watts: percent_to_watts(percent, base_watts),
        }
    }
}

/// Convert a power percentage into watts of `base_watts`
pub fn percent_to_watts(percent: u8, base_watts: u32) -> u32 {
    let watts = u64::from(base_watts) * u64::from(percent.min(100)) / 100;
    u32::try_from(watts).unwrap_or(base_watts)
}

/// Convert watts back into a percentage of `base_watts`, rounded and clamped to 0-100
pub fn watts_to_percent(watts: u32, base_watts: u32) -> u8 {
    if base_watts == 0 {
        return 0;
    }
    let pct = (u64::from(watts) * 100 + u64::from(base_watts) / 2) / u64::from(base_watts);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Operator-facing view of the decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoControlStatus {
    pub enabled: bool,
    pub mode: AutoControlMode,
    /// Last computed target
    pub target_pct: Option<u8>,
    pub target_w: Option<u32>,
    /// Last target actually enqueued
    pub last_set_pct: Option<u8>,
    pub last_set_w: Option<u32>,
    pub latched_floor_pct: Option<u8>,
    pub latched_floor_w: Option<u32>,
    pub min_interval_sec: u64,
    /// Which rule produced the target
    pub description: String,
    /// Local sunset as HH:MM:SS, or "Unknown"
    pub sunset_time: String,
    pub is_past_sunset: bool,
}
