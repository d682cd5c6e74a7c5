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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device status captured by one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub timestamp: DateTime<Utc>,

    /// Current power draw (W)
    pub power_w: Option<f64>,

    /// Power limit reported by the firmware (W)
    pub power_limit_w: Option<u32>,

    /// Hashrate normalized to TH/s
    pub hashrate_ths: Option<f64>,

    /// Power divided by hashrate (W/TH)
    pub efficiency_w_per_th: Option<f64>,

    pub mining: bool,

    pub temperature_c: Option<f64>,

    /// Firmware-reported uptime
    pub elapsed_secs: Option<u64>,
}

/// Battery bank status captured by one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub timestamp: DateTime<Utc>,

    /// State of charge (0-100%)
    pub soc_percent: f64,

    /// Incoming solar power (W)
    pub pv_power_w: f64,

    /// House load (W)
    pub load_power_w: f64,

    /// Battery power (positive = charge, negative = discharge)
    pub battery_power_w: Option<f64>,
}

/// Per-source connection bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// Start of the current connected streak
    pub connected_since: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Record a successful poll at `now`
    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        if !self.connected || self.connected_since.is_none() {
            self.connected_since = Some(now);
        }
        self.connected = true;
        self.last_seen = Some(now);
        self.uptime_secs = self
            .connected_since
            .map_or(0, |since| u64::try_from((now - since).num_seconds()).unwrap_or(0));
        self.error = None;
    }

    /// Record a failed poll; `last_seen` is kept
    pub fn mark_failure(&mut self, error: impl Into<String>) {
        self.connected = false;
        self.connected_since = None;
        self.uptime_secs = 0;
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_connection_uptime_tracks_streak() {
        let t0 = Utc::now();
        let mut status = ConnectionStatus::default();

        status.mark_success(t0);
        status.mark_success(t0 + Duration::seconds(30));
        assert!(status.connected);
        assert_eq!(status.uptime_secs, 30);

        status.mark_failure("connection refused");
        assert!(!status.connected);
        assert_eq!(status.uptime_secs, 0);
        assert_eq!(status.last_seen, Some(t0 + Duration::seconds(30)));
        assert_eq!(status.error.as_deref(), Some("connection refused"));

        status.mark_success(t0 + Duration::seconds(60));
        assert_eq!(status.uptime_secs, 0);
        assert!(status.error.is_none());
    }
}
