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

use anyhow::Result;
use async_trait::async_trait;
use solhash_types::{BatterySnapshot, DeviceSnapshot};

// ============= SolHash Data Source Traits =============

/// Controlled device (status reads and power commands).
///
/// Only the dispatcher calls the mutating methods; pollers and verification only
/// call `read_status`.
#[async_trait]
pub trait DeviceDataSource: Send + Sync {
    /// Read current device status. `Ok(None)` means the device did not answer
    /// (typically mid-restart) and is not an error.
    async fn read_status(&self) -> Result<Option<DeviceSnapshot>>;

    /// Stop hashing
    async fn stop(&self) -> Result<()>;

    /// Resume hashing
    async fn resume(&self) -> Result<()>;

    /// Set the absolute power limit in watts
    async fn set_power_limit(&self, watts: u32) -> Result<()>;

    /// Check if the device answers at all
    async fn health_check(&self) -> Result<bool>;

    /// Get the data source name
    fn name(&self) -> &str;
}

/// Read-only battery/solar telemetry
#[async_trait]
pub trait BatteryDataSource: Send + Sync {
    /// Read the current battery state
    async fn read_battery(&self) -> Result<BatterySnapshot>;

    /// Check if the source is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Get the data source name
    fn name(&self) -> &str;
}
