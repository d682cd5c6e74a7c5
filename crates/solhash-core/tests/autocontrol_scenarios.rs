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

//! End-to-end scenarios: pollers, engine, dispatcher and store running together
//! against an in-memory device and battery.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use solhash_core::{
    AutoControlConfig, BatteryDataSource, ControlSystem, ControlSystemConfig, DeviceDataSource,
    DispatchConfig, StateStore,
};
use solhash_types::{
    BatterySnapshot, CommandKind, ControlStatePatch, DevicePowerState, DeviceSnapshot, OpState,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct FakeDevice {
    mining: Mutex<bool>,
    limit_w: Mutex<u32>,
    calls: Mutex<Vec<String>>,
}

impl FakeDevice {
    fn new(mining: bool) -> Self {
        Self {
            mining: Mutex::new(mining),
            limit_w: Mutex::new(3600),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeviceDataSource for FakeDevice {
    async fn read_status(&self) -> Result<Option<DeviceSnapshot>> {
        let mining = *self.mining.lock();
        let limit = *self.limit_w.lock();
        Ok(Some(DeviceSnapshot {
            timestamp: Utc::now(),
            power_w: Some(if mining { f64::from(limit) } else { 10.0 }),
            power_limit_w: Some(limit),
            hashrate_ths: Some(if mining { 90.0 } else { 0.0 }),
            efficiency_w_per_th: None,
            mining,
            temperature_c: Some(55.0),
            elapsed_secs: Some(600),
        }))
    }

    async fn stop(&self) -> Result<()> {
        self.calls.lock().push("stop".into());
        *self.mining.lock() = false;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.calls.lock().push("resume".into());
        *self.mining.lock() = true;
        Ok(())
    }

    async fn set_power_limit(&self, watts: u32) -> Result<()> {
        self.calls.lock().push(format!("limit:{watts}"));
        *self.limit_w.lock() = watts;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "fake-device"
    }
}

struct FixedBattery {
    soc: Mutex<f64>,
    pv: f64,
}

#[async_trait]
impl BatteryDataSource for FixedBattery {
    async fn read_battery(&self) -> Result<BatterySnapshot> {
        Ok(BatterySnapshot {
            timestamp: Utc::now(),
            soc_percent: *self.soc.lock(),
            pv_power_w: self.pv,
            load_power_w: 300.0,
            battery_power_w: None,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "fixed-battery"
    }
}

fn fast_config(enabled: bool) -> ControlSystemConfig {
    ControlSystemConfig {
        autocontrol: AutoControlConfig {
            enabled,
            eval_interval: Duration::from_millis(40),
            ..AutoControlConfig::default()
        },
        dispatch: DispatchConfig {
            verify_timeout: Duration::from_millis(300),
            verify_interval: Duration::from_millis(10),
            ..DispatchConfig::default()
        },
        device_poll_interval: Duration::from_millis(30),
        battery_poll_interval: Duration::from_millis(30),
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn low_battery_stops_running_device() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path().join("control_state.json"));
    store
        .save(ControlStatePatch::new().device_power_state(DevicePowerState::Running))
        .unwrap();

    let device = Arc::new(FakeDevice::new(true));
    let battery = Arc::new(FixedBattery {
        soc: Mutex::new(25.0),
        pv: 0.0,
    });

    let system = ControlSystem::start(device.clone(), battery, store.clone(), fast_config(true))
        .unwrap();

    assert!(
        wait_for(|| store.load().device_power_state == DevicePowerState::Stopped).await,
        "device never confirmed stopped"
    );
    assert_eq!(device.calls(), vec!["stop"]);
    assert_eq!(store.load().target_power_pct, 0);

    let state = system.control().get_state();
    assert_eq!(state.target_pct, Some(0));
    assert_eq!(state.latched_floor_pct, None);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn full_battery_runs_at_full_power() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path().join("control_state.json"));
    let device = Arc::new(FakeDevice::new(false));
    let battery = Arc::new(FixedBattery {
        soc: Mutex::new(100.0),
        pv: 0.0,
    });

    let system = ControlSystem::start(device.clone(), battery, store.clone(), fast_config(true))
        .unwrap();

    assert!(wait_for(|| store.load().target_power_pct == 100).await);
    assert_eq!(device.calls(), vec!["resume", "limit:3600"]);
    assert_eq!(
        store.load().device_power_state,
        DevicePowerState::Running
    );

    let state = system.control().get_state();
    assert_eq!(state.last_set_w, Some(3600));
    assert_eq!(state.latched_floor_w, None);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_engine_leaves_device_alone_until_enabled() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path().join("control_state.json"));
    let device = Arc::new(FakeDevice::new(true));
    let battery = Arc::new(FixedBattery {
        soc: Mutex::new(55.0),
        pv: 0.0,
    });

    let system = ControlSystem::start(device.clone(), battery, store.clone(), fast_config(false))
        .unwrap();
    let control = system.control();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(device.calls().is_empty());
    assert!(!control.get_state().enabled);

    control.enable().unwrap();
    assert!(store.load().autocontrol_enabled);
    assert!(wait_for(|| store.load().target_power_pct == 60).await);
    assert_eq!(device.calls(), vec!["limit:2160"]);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_commands_share_the_queue() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path().join("control_state.json"));
    let device = Arc::new(FakeDevice::new(true));
    let battery = Arc::new(FixedBattery {
        soc: Mutex::new(70.0),
        pv: 0.0,
    });

    let system = ControlSystem::start(device.clone(), battery, store.clone(), fast_config(false))
        .unwrap();
    let control = system.control();

    let first = control.enqueue_manual(CommandKind::Stop).unwrap();
    let second = control
        .enqueue_manual(CommandKind::SetPowerLimit { watts: 1200 })
        .unwrap();
    assert!(second > first);

    assert!(wait_for(|| !control.dispatch_status().is_busy()).await);
    let status = control.dispatch_status();
    assert_eq!(status.op_state, OpState::Idle);
    assert_eq!(status.request_id, Some(second));
    assert_eq!(device.calls(), vec!["stop", "limit:1200"]);

    let persisted = store.load();
    assert_eq!(persisted.device_power_state, DevicePowerState::Stopped);
    assert_eq!(persisted.target_power_pct, 33);

    system.shutdown().await;
}
