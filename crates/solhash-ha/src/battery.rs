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

use crate::client::HomeAssistantClient;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use solhash_core::BatteryDataSource;
use solhash_types::BatterySnapshot;
use tracing::debug;

/// Sensor entities making up one battery snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryEntities {
    pub soc: String,
    pub pv_power: String,
    pub load_power: String,
    pub battery_power: Option<String>,
}

/// Reads battery and solar sensors from Home Assistant
pub struct HaBatterySource {
    client: HomeAssistantClient,
    entities: BatteryEntities,
}

impl HaBatterySource {
    pub fn new(client: HomeAssistantClient, entities: BatteryEntities) -> Self {
        Self { client, entities }
    }

    async fn read_sensor_float(&self, entity_id: &str) -> Result<f64> {
        let value = self
            .client
            .get_numeric(entity_id)
            .await
            .with_context(|| format!("Failed to read entity: {}", entity_id))?;
        debug!("✅ [ADAPTER] {} = {}", entity_id, value);
        Ok(value)
    }
}

#[async_trait]
impl BatteryDataSource for HaBatterySource {
    async fn read_battery(&self) -> Result<BatterySnapshot> {
        let soc = self.read_sensor_float(&self.entities.soc).await?;
        if !(0.0..=100.0).contains(&soc) {
            bail!(
                "Battery SOC {} from {} is outside 0-100%",
                soc,
                self.entities.soc
            );
        }

        let pv_power = self.read_sensor_float(&self.entities.pv_power).await?;
        let load_power = self.read_sensor_float(&self.entities.load_power).await?;

        // Battery power is informational; a missing sensor does not fail the poll
        let battery_power = match &self.entities.battery_power {
            Some(entity) => match self.read_sensor_float(entity).await {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("Battery power unavailable: {:#}", e);
                    None
                }
            },
            None => None,
        };

        Ok(BatterySnapshot {
            timestamp: Utc::now(),
            soc_percent: soc,
            pv_power_w: pv_power,
            load_power_w: load_power,
            battery_power_w: battery_power,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.client.ping().await?)
    }

    fn name(&self) -> &str {
        "home_assistant"
    }
}
