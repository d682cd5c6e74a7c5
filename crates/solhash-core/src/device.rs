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

use crate::traits::DeviceDataSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use solhash_protocol::{DeviceClient, Reply, SummaryItem, TcpTransport, Transport};
use solhash_types::DeviceSnapshot;
use tracing::{debug, info};

/// `DeviceDataSource` backed by the device's own line protocol
#[derive(Debug)]
pub struct ProtocolDevice<T: Transport = TcpTransport> {
    client: DeviceClient<T>,
    name: String,
}

impl<T: Transport> ProtocolDevice<T> {
    pub fn new(client: DeviceClient<T>) -> Self {
        let name = format!("device@{}", client.peer());
        Self { client, name }
    }

    pub fn client(&self) -> &DeviceClient<T> {
        &self.client
    }
}

/// Build a device snapshot from one summary item
pub fn snapshot_from_summary(item: &SummaryItem, timestamp: DateTime<Utc>) -> DeviceSnapshot {
    DeviceSnapshot {
        timestamp,
        power_w: item.power_w,
        power_limit_w: item.power_limit_w,
        hashrate_ths: item.hashrate_ths,
        efficiency_w_per_th: item.efficiency_w_per_th(),
        mining: item.mining(),
        temperature_c: item.temperature_c,
        elapsed_secs: item.elapsed_secs,
    }
}

#[async_trait]
impl<T: Transport + 'static> DeviceDataSource for ProtocolDevice<T> {
    async fn read_status(&self) -> Result<Option<DeviceSnapshot>> {
        let reply = self
            .client
            .summary()
            .await
            .with_context(|| format!("Failed to read summary from {}", self.client.peer()))?;

        match reply {
            Reply::Data(summary) => {
                let snapshot = snapshot_from_summary(&summary.item, Utc::now());
                debug!(
                    "⛏️ [DEVICE] power={:?}W limit={:?}W hashrate={:?}TH/s mining={}",
                    snapshot.power_w,
                    snapshot.power_limit_w,
                    snapshot.hashrate_ths,
                    snapshot.mining
                );
                Ok(Some(snapshot))
            }
            Reply::NoData => Ok(None),
        }
    }

    async fn stop(&self) -> Result<()> {
        info!("🛑 [DEVICE] power_off -> {}", self.client.peer());
        self.client.power_off().await.context("power_off failed")?;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        info!("▶️ [DEVICE] power_on -> {}", self.client.peer());
        self.client.power_on().await.context("power_on failed")?;
        Ok(())
    }

    async fn set_power_limit(&self, watts: u32) -> Result<()> {
        info!("⚡ [DEVICE] adjust_power_limit {}W -> {}", watts, self.client.peer());
        self.client
            .adjust_power_limit(watts)
            .await
            .with_context(|| format!("adjust_power_limit({watts}) failed"))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.version().await {
            Ok(Reply::Data(_)) => Ok(true),
            Ok(Reply::NoData) | Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
