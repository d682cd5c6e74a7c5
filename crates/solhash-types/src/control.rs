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

//! Persisted control state.
//!
//! `ControlState` is the durable record of what was last confirmed on the device
//! plus the auto-control toggle. Every field carries a serde default so documents
//! written by older versions (or hand-edited ones missing keys) still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confirmed power state of the controlled device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePowerState {
    /// Device confirmed stopped (not hashing)
    #[default]
    Stopped,
    /// Device confirmed running
    Running,
}

impl DevicePowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for DevicePowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DevicePowerState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            _ => Err(anyhow::anyhow!(
                "Unknown device power state: '{}'. Expected 'stopped' or 'running'",
                s
            )),
        }
    }
}

/// Durable control state, restored on startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    #[serde(default)]
    pub autocontrol_enabled: bool,

    /// Last confirmed power target (0-100%)
    #[serde(default)]
    pub target_power_pct: u8,

    #[serde(default)]
    pub device_power_state: DevicePowerState,

    /// Stamped by the store on every save
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            autocontrol_enabled: false,
            target_power_pct: 0,
            device_power_state: DevicePowerState::Stopped,
            last_updated: None,
        }
    }
}

/// A partial update merged into the stored `ControlState`.
///
/// Only `Some` fields are applied; everything else keeps its current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStatePatch {
    pub autocontrol_enabled: Option<bool>,
    pub target_power_pct: Option<u8>,
    pub device_power_state: Option<DevicePowerState>,
}

impl ControlStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn autocontrol_enabled(mut self, enabled: bool) -> Self {
        self.autocontrol_enabled = Some(enabled);
        self
    }

    pub fn target_power_pct(mut self, pct: u8) -> Self {
        self.target_power_pct = Some(pct.min(100));
        self
    }

    pub fn device_power_state(mut self, state: DevicePowerState) -> Self {
        self.device_power_state = Some(state);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.autocontrol_enabled.is_none()
            && self.target_power_pct.is_none()
            && self.device_power_state.is_none()
    }

    /// Merge this patch into `state`
    pub fn apply_to(&self, state: &mut ControlState) {
        if let Some(enabled) = self.autocontrol_enabled {
            state.autocontrol_enabled = enabled;
        }
        if let Some(pct) = self.target_power_pct {
            state.target_power_pct = pct;
        }
        if let Some(power_state) = self.device_power_state {
            state.device_power_state = power_state;
        }
    }
}
