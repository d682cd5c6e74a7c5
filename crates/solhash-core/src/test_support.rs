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

//! In-process fakes shared by unit tests.

use crate::traits::{BatteryDataSource, DeviceDataSource};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_timer::Delay;
use parking_lot::Mutex;
use solhash_types::{BatterySnapshot, DeviceSnapshot};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn battery_at(timestamp: DateTime<Utc>, soc: f64, pv: f64) -> BatterySnapshot {
    BatterySnapshot {
        timestamp,
        soc_percent: soc,
        pv_power_w: pv,
        load_power_w: 400.0,
        battery_power_w: None,
    }
}

/// Battery source replaying queued results; repeats the last success when empty
#[derive(Default)]
pub struct ScriptedBattery {
    queue: Mutex<VecDeque<Result<(f64, f64), String>>>,
    last: Mutex<Option<(f64, f64)>>,
}

impl ScriptedBattery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, soc: f64, pv: f64) {
        self.queue.lock().push_back(Ok((soc, pv)));
    }

    pub fn push_err(&self, message: &str) {
        self.queue.lock().push_back(Err(message.to_owned()));
    }
}

#[async_trait]
impl BatteryDataSource for ScriptedBattery {
    async fn read_battery(&self) -> Result<BatterySnapshot> {
        let next = self.queue.lock().pop_front();
        match next {
            Some(Ok((soc, pv))) => {
                *self.last.lock() = Some((soc, pv));
                Ok(battery_at(Utc::now(), soc, pv))
            }
            Some(Err(message)) => bail!(message),
            None => match *self.last.lock() {
                Some((soc, pv)) => Ok(battery_at(Utc::now(), soc, pv)),
                None => bail!("no scripted battery data"),
            },
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted-battery"
    }
}

#[derive(Debug, Clone)]
struct SimState {
    mining: bool,
    limit_w: u32,
}

/// Simulated device that applies commands instantly unless told otherwise
pub struct SimulatedDevice {
    state: Mutex<SimState>,
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<Option<String>>,
    fail_next_limit: Mutex<Option<String>>,
    ignore_commands: AtomicBool,
    command_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedDevice {
    pub fn new(mining: bool, limit_w: u32) -> Self {
        Self {
            state: Mutex::new(SimState { mining, limit_w }),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            fail_next_limit: Mutex::new(None),
            ignore_commands: AtomicBool::new(false),
            command_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn is_mining(&self) -> bool {
        self.state.lock().mining
    }

    pub fn limit_w(&self) -> u32 {
        self.state.lock().limit_w
    }

    /// Next mutating call returns this error
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_owned());
    }

    /// Next power-limit call returns this error; stop and resume still work
    pub fn fail_next_limit(&self, message: &str) {
        *self.fail_next_limit.lock() = Some(message.to_owned());
    }

    /// Accept commands without changing state (verification will fail)
    pub fn ignore_commands(&self, ignore: bool) {
        self.ignore_commands.store(ignore, Ordering::SeqCst);
    }

    pub fn set_command_delay(&self, delay: Duration) {
        *self.command_delay.lock() = delay;
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn mutate(&self, call: String, apply: impl FnOnce(&mut SimState)) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let is_limit = call.starts_with("limit:");
        self.calls.lock().push(call);

        let delay = *self.command_delay.lock();
        if !delay.is_zero() {
            Delay::new(delay).await;
        }

        let mut failure = self.fail_next.lock().take();
        if failure.is_none() && is_limit {
            failure = self.fail_next_limit.lock().take();
        }
        let result = match failure {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => {
                if !self.ignore_commands.load(Ordering::SeqCst) {
                    let mut state = self.state.lock();
                    apply(&mut *state);
                }
                Ok(())
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl DeviceDataSource for SimulatedDevice {
    async fn read_status(&self) -> Result<Option<DeviceSnapshot>> {
        let state = self.state.lock().clone();
        Ok(Some(DeviceSnapshot {
            timestamp: Utc::now(),
            power_w: Some(if state.mining {
                f64::from(state.limit_w) * 0.95
            } else {
                12.0
            }),
            power_limit_w: Some(state.limit_w),
            hashrate_ths: Some(if state.mining { 100.0 } else { 0.0 }),
            efficiency_w_per_th: None,
            mining: state.mining,
            temperature_c: None,
            elapsed_secs: None,
        }))
    }

    async fn stop(&self) -> Result<()> {
        self.mutate("stop".to_owned(), |s| s.mining = false).await
    }

    async fn resume(&self) -> Result<()> {
        self.mutate("resume".to_owned(), |s| s.mining = true).await
    }

    async fn set_power_limit(&self, watts: u32) -> Result<()> {
        self.mutate(format!("limit:{watts}"), |s| s.limit_w = watts)
            .await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "simulated-device"
    }
}
