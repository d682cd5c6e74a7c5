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

//! Runtime configuration of the control core.
//!
//! These are plain resolved values; file parsing and validation live in the
//! application crate.

use crate::policy::RuleThresholds;
use chrono_tz::Tz;
use solhash_types::AutoControlMode;
use std::time::Duration;

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Nominal full power of the device (W), used for percent conversion
    pub base_watts: u32,
    /// Upper bound for verification polling
    pub verify_timeout: Duration,
    /// Delay between verification polls
    pub verify_interval: Duration,
    /// Log commands without sending or persisting them
    pub dry_run: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_watts: 3600,
            verify_timeout: Duration::from_secs(45),
            verify_interval: Duration::from_secs(3),
            dry_run: false,
        }
    }
}

/// Decision engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct AutoControlConfig {
    /// Force auto-control on at startup
    pub enabled: bool,
    pub mode: AutoControlMode,
    pub eval_interval: Duration,
    pub min_interval: Duration,
    pub min_delta_pct: u8,
    pub thresholds: RuleThresholds,
    /// Device counts as off below this power draw (W)
    pub device_off_watts: f64,
    /// Battery snapshots older than this are not acted on
    pub battery_max_age: Duration,
    /// Device snapshots older than this are ignored for the off check
    pub device_max_age: Duration,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,
    pub sunset_fallback_hour: u32,
    pub sunset_fallback_minute: u32,
    pub base_watts: u32,
}

impl Default for AutoControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AutoControlMode::Away,
            eval_interval: Duration::from_secs(20),
            min_interval: Duration::from_secs(60),
            min_delta_pct: 5,
            thresholds: RuleThresholds::default(),
            device_off_watts: 100.0,
            battery_max_age: Duration::from_secs(90),
            device_max_age: Duration::from_secs(60),
            latitude: 40.0,
            longitude: -74.0,
            timezone: chrono_tz::America::New_York,
            sunset_fallback_hour: 19,
            sunset_fallback_minute: 0,
            base_watts: 3600,
        }
    }
}
