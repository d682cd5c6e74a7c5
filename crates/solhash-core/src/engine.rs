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

//! Auto-control decision engine.
//!
//! One evaluation per tick: read fresh battery telemetry, run the away-mode rules,
//! gate the result through the rate limiter and hand at most one command to the
//! dispatcher. The engine owns the latched floor and the rate limiter; nothing
//! else mutates them.

use crate::config::AutoControlConfig;
use crate::dispatcher::DispatcherHandle;
use crate::policy::{
    Decision, LatchedFloor, RateLimiter, Rule, RuleInputs, SkipReason, evaluate_rules,
};
use crate::store::StateStore;
use crate::sunset::SunsetCalculator;
use crate::telemetry::{BatteryPoller, DeviceCache};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use solhash_types::{
    AutoControlMode, AutoControlStatus, CommandKind, CommandSource, DevicePowerState, OpState,
    percent_to_watts,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Messages from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Auto-control switched on; the next change may go out immediately
    Enable,
    Disable,
    SetMode(AutoControlMode),
}

/// What one evaluation cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Disabled,
    /// Dispatcher still has queued or in-flight work
    DispatcherBusy,
    /// No battery snapshot young enough to act on
    StaleTelemetry,
    Skipped { decision: Decision, reason: SkipReason },
    Enqueued { decision: Decision, request_id: u64 },
    QueueClosed,
}

pub struct DecisionEngine {
    config: AutoControlConfig,
    mode: AutoControlMode,
    enabled: Arc<AtomicBool>,
    battery: BatteryPoller,
    device_cache: DeviceCache,
    dispatcher: DispatcherHandle,
    store: StateStore,
    sunset: SunsetCalculator,
    limiter: RateLimiter,
    floor: LatchedFloor,
    status: Arc<RwLock<AutoControlStatus>>,
}

impl DecisionEngine {
    pub fn new(
        config: AutoControlConfig,
        initially_enabled: bool,
        battery: BatteryPoller,
        device_cache: DeviceCache,
        dispatcher: DispatcherHandle,
        store: StateStore,
    ) -> Self {
        let sunset = SunsetCalculator::new(
            config.latitude,
            config.longitude,
            config.timezone,
            config.sunset_fallback_hour,
            config.sunset_fallback_minute,
        );
        let limiter = RateLimiter::new(config.min_interval, config.min_delta_pct);
        let status = AutoControlStatus {
            enabled: initially_enabled,
            mode: config.mode,
            target_pct: None,
            target_w: None,
            last_set_pct: None,
            last_set_w: None,
            latched_floor_pct: None,
            latched_floor_w: None,
            min_interval_sec: config.min_interval.as_secs(),
            description: "Waiting for first evaluation".to_owned(),
            sunset_time: "Unknown".to_owned(),
            is_past_sunset: false,
        };

        Self {
            mode: config.mode,
            config,
            enabled: Arc::new(AtomicBool::new(initially_enabled)),
            battery,
            device_cache,
            dispatcher,
            store,
            sunset,
            limiter,
            floor: LatchedFloor::default(),
            status: Arc::new(RwLock::new(status)),
        }
    }

    /// Flag shared with the control surface, which is its only writer
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }

    pub fn status_handle(&self) -> Arc<RwLock<AutoControlStatus>> {
        Arc::clone(&self.status)
    }

    pub fn latched_floor(&self) -> Option<u8> {
        self.floor.get()
    }

    pub fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Enable => {
                info!("🤖 Auto-control enabled");
                self.limiter.reset_timer();
            }
            EngineCommand::Disable => {
                info!("🤖 Auto-control disabled, last intent left in place");
            }
            EngineCommand::SetMode(mode) => {
                info!("🤖 Auto-control mode: {} -> {}", self.mode, mode);
                self.mode = mode;
                self.limiter.reset_timer();
            }
        }
        let mut status = self.status.write();
        status.enabled = self.enabled.load(Ordering::SeqCst);
        status.mode = self.mode;
    }

    /// Run one evaluation at `now`
    pub async fn evaluate_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let is_past_sunset = self.sunset.is_past_sunset(now);
        let sunset_time = self.sunset.sunset(now).format("%H:%M:%S").to_string();
        {
            let mut status = self.status.write();
            status.enabled = self.enabled.load(Ordering::SeqCst);
            status.mode = self.mode;
            status.sunset_time = sunset_time;
            status.is_past_sunset = is_past_sunset;
        }

        if !self.enabled.load(Ordering::SeqCst) {
            self.describe("Auto-control disabled");
            return CycleOutcome::Disabled;
        }

        let dispatch = self.dispatcher.status();
        if dispatch.is_busy() {
            debug!("⏳ Dispatcher busy, skipping evaluation");
            self.describe("Waiting for pending command");
            return CycleOutcome::DispatcherBusy;
        }

        let Some(battery) = self.fresh_battery(now).await else {
            self.describe("Battery telemetry stale, holding last intent");
            return CycleOutcome::StaleTelemetry;
        };

        let inputs = RuleInputs {
            soc_percent: battery.soc_percent,
            pv_power_w: battery.pv_power_w,
            past_sunset: is_past_sunset,
            device_off: self.device_off(now),
            latched_floor: self.floor.get(),
        };
        let decision = evaluate_rules(&self.config.thresholds, &inputs);
        if decision.clear_floor && self.floor.get().is_some() {
            info!("🔋 Battery full, latched floor cleared");
            self.floor.clear();
        }

        {
            let mut status = self.status.write();
            status.target_pct = Some(decision.percent);
            status.target_w = Some(percent_to_watts(decision.percent, self.config.base_watts));
            status.description = decision.rule.to_string();
        }
        self.publish_floor();

        if let Err(reason) = self.gate(&decision, inputs.device_off, dispatch.op_state, now) {
            debug!(
                "⏸️ [AUTO] SOC {:.1}% -> {}% not sent: {}",
                inputs.soc_percent, decision.percent, reason
            );
            return CycleOutcome::Skipped { decision, reason };
        }

        let kind = if decision.percent == 0 {
            CommandKind::Stop
        } else {
            CommandKind::SetPowerPercent {
                percent: decision.percent,
            }
        };

        match self.dispatcher.enqueue(kind, CommandSource::Auto) {
            Ok(request_id) => {
                info!(
                    "🎯 [AUTO] SOC {:.1}%, PV {:.0}W -> {}% ({})",
                    inputs.soc_percent, inputs.pv_power_w, decision.percent, decision.rule
                );
                self.limiter.record(decision.percent, now);
                self.floor.record(decision.percent);
                {
                    let mut status = self.status.write();
                    status.last_set_pct = Some(decision.percent);
                    status.last_set_w =
                        Some(percent_to_watts(decision.percent, self.config.base_watts));
                }
                self.publish_floor();
                CycleOutcome::Enqueued {
                    decision,
                    request_id,
                }
            }
            Err(e) => {
                error!("❌ [AUTO] Could not enqueue {}: {}", kind, e);
                CycleOutcome::QueueClosed
            }
        }
    }

    /// Evaluation loop; control messages are handled between cycles
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "🤖 Decision engine started (mode: {}, every {:?}, enabled: {})",
            self.mode,
            self.config.eval_interval,
            self.enabled.load(Ordering::SeqCst)
        );

        let mut ticker = tokio::time::interval(self.config.eval_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.evaluate_cycle(Utc::now()).await;
                    debug!("Evaluation outcome: {:?}", outcome);
                }
                Some(command) = commands.recv() => self.handle_command(command),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("🤖 Decision engine stopped");
    }

    async fn fresh_battery(&self, now: DateTime<Utc>) -> Option<solhash_types::BatterySnapshot> {
        let max_age = self.config.battery_max_age;
        if let Some(snapshot) = self.battery.cache().fresh(max_age, now) {
            return Some(snapshot);
        }

        // Cache went stale between polls; try once before giving up on this cycle
        if let Err(e) = self.battery.poll_once().await {
            warn!("⚠️ Battery refresh failed: {:#}", e);
        }
        self.battery.cache().fresh(max_age, now)
    }

    /// Decide whether `decision` goes out this cycle.
    ///
    /// An emergency stop is re-sent every cycle until device telemetry shows it
    /// stopped, bypassing the rate limiter. A non-zero target the device is not
    /// running, or whose last command failed, only waits out the interval.
    fn gate(
        &self,
        decision: &Decision,
        device_off: bool,
        last_op: OpState,
        now: DateTime<Utc>,
    ) -> Result<(), SkipReason> {
        if decision.rule == Rule::Emergency {
            let confirmed_stopped = self
                .device_cache
                .fresh(self.config.device_max_age, now)
                .is_some_and(|snapshot| !snapshot.mining);
            return if confirmed_stopped {
                Err(SkipReason::AlreadyStopped)
            } else {
                Ok(())
            };
        }

        if device_off || last_op == OpState::Error {
            self.limiter.check_interval(now)
        } else {
            self.limiter.check(decision.percent, now)
        }
    }

    fn device_off(&self, now: DateTime<Utc>) -> bool {
        match self.device_cache.fresh(self.config.device_max_age, now) {
            Some(snapshot) => {
                !snapshot.mining
                    || snapshot
                        .power_w
                        .is_some_and(|w| w < self.config.device_off_watts)
            }
            None => self.store.load().device_power_state == DevicePowerState::Stopped,
        }
    }

    fn describe(&self, text: &str) {
        self.status.write().description = text.to_owned();
    }

    fn publish_floor(&self) {
        let mut status = self.status.write();
        status.latched_floor_pct = self.floor.get();
        status.latched_floor_w = self
            .floor
            .get()
            .map(|pct| percent_to_watts(pct, self.config.base_watts));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::dispatcher::Dispatcher;
    use crate::telemetry::BatteryCache;
    use crate::test_support::{ScriptedBattery, SimulatedDevice};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tokio::runtime::Handle;

    struct Rig {
        engine: DecisionEngine,
        battery: Arc<ScriptedBattery>,
        device: Arc<SimulatedDevice>,
        dispatcher: DispatcherHandle,
        store: StateStore,
        _dir: TempDir,
    }

    impl Rig {
        fn new(mining: bool) -> Self {
            let dir = tempdir().unwrap();
            let store = StateStore::new(dir.path().join("control_state.json"));
            let device = Arc::new(SimulatedDevice::new(mining, 3600));
            let battery = Arc::new(ScriptedBattery::new());
            let device_cache = DeviceCache::new();

            let (dispatcher, _join) = Dispatcher::spawn(
                device.clone(),
                device_cache.clone(),
                store.clone(),
                DispatchConfig {
                    verify_timeout: Duration::from_millis(200),
                    verify_interval: Duration::from_millis(10),
                    ..DispatchConfig::default()
                },
                Handle::current(),
            )
            .unwrap();

            let engine = DecisionEngine::new(
                AutoControlConfig::default(),
                true,
                BatteryPoller::new(battery.clone(), BatteryCache::new()),
                device_cache,
                dispatcher.clone(),
                store.clone(),
            );

            Self {
                engine,
                battery,
                device,
                dispatcher,
                store,
                _dir: dir,
            }
        }

        async fn settle(&self) {
            for _ in 0..200 {
                if !self.dispatcher.status().is_busy() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("dispatcher never settled");
        }

        async fn cycle(&mut self, soc: f64, pv: f64, now: DateTime<Utc>) -> CycleOutcome {
            self.battery.push_ok(soc, pv);
            let _ = self.engine.battery.poll_once().await;
            let outcome = self.engine.evaluate_cycle(now).await;
            self.settle().await;
            outcome
        }
    }

    /// Midday in New York, well before sunset
    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 21, 16, 0, 0).unwrap()
    }

    fn enqueued_percent(outcome: &CycleOutcome) -> Option<u8> {
        match outcome {
            CycleOutcome::Enqueued { decision, .. } => Some(decision.percent),
            _ => None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_engine_does_nothing() {
        let mut rig = Rig::new(true);
        rig.engine.enabled_flag().store(false, Ordering::SeqCst);

        let outcome = rig.cycle(25.0, 0.0, midday()).await;
        assert_eq!(outcome, CycleOutcome::Disabled);
        assert!(rig.device.calls().is_empty());
        assert_eq!(
            rig.engine.status_handle().read().description,
            "Auto-control disabled"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_intent_is_always_sent() {
        let mut rig = Rig::new(true);

        let outcome = rig.cycle(55.0, 0.0, midday()).await;
        assert_eq!(enqueued_percent(&outcome), Some(60));
        assert_eq!(rig.device.calls(), vec!["limit:2160"]);

        let status = rig.engine.status_handle().read().clone();
        assert_eq!(status.target_pct, Some(60));
        assert_eq!(status.last_set_w, Some(2160));
        assert_eq!(status.latched_floor_pct, Some(60));
        assert!(!status.is_past_sunset);
        assert_ne!(status.sunset_time, "Unknown");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emergency_stops_device_and_persists() {
        let mut rig = Rig::new(true);

        let outcome = rig.cycle(25.0, 0.0, midday()).await;
        assert_eq!(enqueued_percent(&outcome), Some(0));
        assert_eq!(rig.device.calls(), vec!["stop"]);
        assert!(!rig.device.is_mining());
        assert_eq!(
            rig.store.load().device_power_state,
            DevicePowerState::Stopped
        );
        // Emergency leaves the floor alone
        assert_eq!(rig.engine.latched_floor(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_emergency_stop_is_retried_until_confirmed() {
        let mut rig = Rig::new(true);
        rig.device.fail_next("connection refused");
        let t0 = midday();

        assert_eq!(enqueued_percent(&rig.cycle(25.0, 0.0, t0).await), Some(0));
        assert_eq!(rig.dispatcher.status().op_state, OpState::Error);
        assert!(rig.device.is_mining());

        let outcome = rig.cycle(20.0, 0.0, t0 + ChronoDuration::minutes(10)).await;
        assert_eq!(enqueued_percent(&outcome), Some(0));
        assert!(!rig.device.is_mining());

        let outcome = rig.cycle(20.0, 0.0, t0 + ChronoDuration::minutes(20)).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::AlreadyStopped,
                ..
            }
        ));
        assert_eq!(rig.device.calls(), vec!["stop", "stop"]);
        assert_eq!(
            rig.store.load().device_power_state,
            DevicePowerState::Stopped
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emergency_stops_again_after_manual_resume() {
        let mut rig = Rig::new(true);
        let t0 = midday();

        rig.cycle(25.0, 0.0, t0).await;
        rig.dispatcher
            .enqueue(CommandKind::Resume, CommandSource::Manual)
            .unwrap();
        rig.settle().await;
        assert!(rig.device.is_mining());

        let outcome = rig.cycle(20.0, 0.0, t0 + ChronoDuration::minutes(10)).await;
        assert_eq!(enqueued_percent(&outcome), Some(0));
        assert_eq!(rig.device.calls(), vec!["stop", "resume", "stop"]);
        assert!(!rig.device.is_mining());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emergency_ignores_rate_limit() {
        let mut rig = Rig::new(true);
        let t0 = midday();

        assert_eq!(enqueued_percent(&rig.cycle(55.0, 0.0, t0).await), Some(60));
        let outcome = rig.cycle(25.0, 0.0, t0 + ChronoDuration::seconds(20)).await;
        assert_eq!(enqueued_percent(&outcome), Some(0));
        assert_eq!(rig.device.calls(), vec!["limit:2160", "stop"]);
        assert!(!rig.device.is_mining());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manually_stopped_device_restarts_after_interval() {
        let mut rig = Rig::new(true);
        let t0 = midday();

        assert_eq!(enqueued_percent(&rig.cycle(55.0, 0.0, t0).await), Some(60));
        rig.dispatcher
            .enqueue(CommandKind::Stop, CommandSource::Manual)
            .unwrap();
        rig.settle().await;

        // Same target as last time, but the device is no longer running it
        let outcome = rig.cycle(55.0, 0.0, t0 + ChronoDuration::seconds(30)).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::TooSoon { .. },
                ..
            }
        ));

        let outcome = rig.cycle(55.0, 0.0, t0 + ChronoDuration::minutes(2)).await;
        assert_eq!(enqueued_percent(&outcome), Some(60));
        assert_eq!(
            rig.device.calls(),
            vec!["limit:2160", "stop", "resume", "limit:2160"]
        );
        assert!(rig.device.is_mining());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rate_limit_between_changes() {
        let mut rig = Rig::new(true);
        let t0 = midday();

        rig.cycle(55.0, 0.0, t0).await;
        let outcome = rig.cycle(45.0, 0.0, t0 + ChronoDuration::seconds(20)).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::TooSoon { .. },
                ..
            }
        ));

        let outcome = rig.cycle(45.0, 0.0, t0 + ChronoDuration::seconds(61)).await;
        assert_eq!(enqueued_percent(&outcome), Some(50));
        assert_eq!(rig.device.calls(), vec!["limit:2160", "limit:1800"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_floor_holds_until_full_charge() {
        let mut rig = Rig::new(true);
        let t0 = midday();

        assert_eq!(enqueued_percent(&rig.cycle(70.0, 0.0, t0).await), Some(70));

        // Tier would be 100 but the floor caps it at 70
        let outcome = rig.cycle(96.0, 3600.0, t0 + ChronoDuration::minutes(5)).await;
        match outcome {
            CycleOutcome::Skipped { decision, reason } => {
                assert_eq!(decision.percent, 70);
                assert_eq!(reason, SkipReason::Unchanged);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let outcome = rig.cycle(100.0, 0.0, t0 + ChronoDuration::minutes(10)).await;
        assert_eq!(enqueued_percent(&outcome), Some(100));
        assert_eq!(rig.engine.latched_floor(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_battery_skips_cycle() {
        let mut rig = Rig::new(true);
        rig.battery.push_err("sensor offline");

        let outcome = rig.engine.evaluate_cycle(midday()).await;
        assert_eq!(outcome, CycleOutcome::StaleTelemetry);
        assert!(rig.device.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_busy_dispatcher_skips_cycle() {
        let mut rig = Rig::new(true);
        rig.device.set_command_delay(Duration::from_millis(100));
        rig.dispatcher
            .enqueue(CommandKind::Resume, CommandSource::Manual)
            .unwrap();

        rig.battery.push_ok(55.0, 0.0);
        let outcome = rig.engine.evaluate_cycle(Utc::now()).await;
        assert_eq!(outcome, CycleOutcome::DispatcherBusy);
        rig.settle().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_post_sunset_starts_stopped_device() {
        let mut rig = Rig::new(false);
        // 23:00 EDT on June 20th
        let night = Utc.with_ymd_and_hms(2024, 6, 21, 3, 0, 0).unwrap();

        let outcome = rig.cycle(55.0, 0.0, night).await;
        match outcome {
            CycleOutcome::Enqueued { decision, .. } => {
                assert_eq!(decision.rule, crate::policy::Rule::PostSunsetStartup);
                assert_eq!(decision.percent, 60);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(rig.device.calls(), vec!["resume", "limit:2160"]);
        assert!(rig.engine.status_handle().read().is_past_sunset);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enable_resets_rate_limit_timer() {
        let mut rig = Rig::new(true);
        let t0 = midday();

        rig.cycle(55.0, 0.0, t0).await;
        rig.engine.handle_command(EngineCommand::Enable);

        let outcome = rig.cycle(45.0, 0.0, t0 + ChronoDuration::seconds(5)).await;
        assert_eq!(enqueued_percent(&outcome), Some(50));
    }
}
