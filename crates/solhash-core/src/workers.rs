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

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    config::{AutoControlConfig, DispatchConfig},
    control::AutoControlHandle,
    dispatcher::{Dispatcher, DispatcherHandle},
    engine::DecisionEngine,
    store::StateStore,
    telemetry::{BatteryCache, BatteryPoller, DeviceCache, DevicePoller},
    traits::{BatteryDataSource, DeviceDataSource},
};

/// Everything needed to start the workers
#[derive(Debug, Clone)]
pub struct ControlSystemConfig {
    pub autocontrol: AutoControlConfig,
    pub dispatch: DispatchConfig,
    pub device_poll_interval: Duration,
    pub battery_poll_interval: Duration,
}

/// Running set of workers: two telemetry pollers, the decision engine and the
/// dispatcher thread
pub struct ControlSystem {
    control: AutoControlHandle,
    dispatcher: DispatcherHandle,
    device_cache: DeviceCache,
    battery_cache: BatteryCache,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    dispatcher_thread: std::thread::JoinHandle<()>,
}

impl ControlSystem {
    /// Spawn all workers on the current tokio runtime
    pub fn start(
        device: Arc<dyn DeviceDataSource>,
        battery: Arc<dyn BatteryDataSource>,
        store: StateStore,
        config: ControlSystemConfig,
    ) -> Result<Self> {
        info!("🚀 Starting control workers...");

        let persisted = store.load();
        let enabled = config.autocontrol.enabled || persisted.autocontrol_enabled;
        info!(
            "📂 Restored control state: autocontrol={}, target={}%, device={}",
            persisted.autocontrol_enabled, persisted.target_power_pct, persisted.device_power_state
        );
        if config.autocontrol.enabled && !persisted.autocontrol_enabled {
            info!("🤖 Auto-control forced on by configuration");
        }

        let device_cache = DeviceCache::new();
        let battery_cache = BatteryCache::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // ============= Command Dispatcher =============
        let (dispatcher, dispatcher_thread) = Dispatcher::spawn(
            Arc::clone(&device),
            device_cache.clone(),
            store.clone(),
            config.dispatch.clone(),
            Handle::current(),
        )
        .context("Failed to spawn dispatcher thread")?;

        // ============= Telemetry Pollers =============
        let device_poller = DevicePoller::new(device, device_cache.clone());
        let battery_poller = BatteryPoller::new(battery, battery_cache.clone());
        let mut tasks = vec![
            device_poller.spawn(config.device_poll_interval, shutdown_rx.clone()),
            battery_poller
                .clone()
                .spawn(config.battery_poll_interval, shutdown_rx.clone()),
        ];

        // ============= Decision Engine =============
        let engine = DecisionEngine::new(
            config.autocontrol,
            enabled,
            battery_poller,
            device_cache.clone(),
            dispatcher.clone(),
            store.clone(),
        );
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let control = AutoControlHandle::new(
            engine_tx,
            engine.enabled_flag(),
            engine.status_handle(),
            dispatcher.clone(),
            store,
        );
        tasks.push(tokio::spawn(engine.run(engine_rx, shutdown_rx)));

        info!("✅ Control workers started");

        Ok(Self {
            control,
            dispatcher,
            device_cache,
            battery_cache,
            shutdown_tx,
            tasks,
            dispatcher_thread,
        })
    }

    pub fn control(&self) -> AutoControlHandle {
        self.control.clone()
    }

    pub fn device_cache(&self) -> &DeviceCache {
        &self.device_cache
    }

    pub fn battery_cache(&self) -> &BatteryCache {
        &self.battery_cache
    }

    /// Stop pollers and the engine, then let the dispatcher drain its queue
    pub async fn shutdown(self) {
        info!("🛑 Stopping control workers...");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }

        self.dispatcher.shutdown();
        let thread = self.dispatcher_thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("Dispatcher thread panicked"),
            Err(e) => error!("Failed to join dispatcher thread: {}", e),
        }

        info!("✅ Control workers stopped");
    }
}
