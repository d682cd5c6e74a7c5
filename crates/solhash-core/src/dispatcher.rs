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

//! Single-consumer command dispatcher.
//!
//! Every device-mutating call goes through one FIFO queue drained by one worker
//! thread, so at most one command is ever in flight. The worker applies a
//! command, verifies its effect by re-reading the device, and only then persists
//! the resulting power state.

use crate::config::DispatchConfig;
use crate::error::{ControlError, DispatchError};
use crate::store::StateStore;
use crate::telemetry::DeviceCache;
use crate::traits::DeviceDataSource;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use futures_timer::Delay;
use parking_lot::RwLock;
use solhash_types::{
    CommandKind, CommandRequest, CommandSource, ControlStatePatch, DevicePowerState,
    DeviceSnapshot, DispatchState, OpState, percent_to_watts, watts_to_percent,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Highest limit the device protocol accepts
const MAX_LIMIT_WATTS: u32 = 99_999;

const WORKER_THREAD_NAME: &str = "solhash-dispatcher";

enum DispatchMessage {
    Run(CommandRequest),
    Shutdown,
}

/// Cloneable, non-blocking front of the dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: Sender<DispatchMessage>,
    state: Arc<RwLock<DispatchState>>,
    pending: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl DispatcherHandle {
    /// Queue a command and return its request id. Never blocks.
    pub fn enqueue(&self, kind: CommandKind, source: CommandSource) -> Result<u64, ControlError> {
        validate(kind)?;

        let request = CommandRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            kind,
            source,
            enqueued_at: Utc::now(),
        };
        let id = request.id;

        // Count before sending so a status read right after enqueue sees it
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(DispatchMessage::Run(request)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ControlError::QueueClosed);
        }

        debug!("📥 Queued #{} {} ({:?})", id, kind, source);
        Ok(id)
    }

    /// Latest dispatcher state
    pub fn status(&self) -> DispatchState {
        let mut state = self.state.read().clone();
        state.pending = self.pending.load(Ordering::SeqCst);
        state
    }

    /// Ask the worker to exit once everything queued so far has been handled
    pub fn shutdown(&self) {
        let _ = self.sender.send(DispatchMessage::Shutdown);
    }
}

fn validate(kind: CommandKind) -> Result<(), ControlError> {
    match kind {
        CommandKind::SetPowerPercent { percent } if percent > 100 => Err(
            ControlError::InvalidRequest(format!("power percent {percent} exceeds 100")),
        ),
        CommandKind::SetPowerLimit { watts } if watts == 0 || watts > MAX_LIMIT_WATTS => {
            Err(ControlError::InvalidRequest(format!(
                "power limit {watts}W outside 1..={MAX_LIMIT_WATTS}"
            )))
        }
        _ => Ok(()),
    }
}

/// Queue worker; owns the only path that mutates the device
pub struct Dispatcher {
    device: Arc<dyn DeviceDataSource>,
    device_cache: DeviceCache,
    store: StateStore,
    config: DispatchConfig,
    state: Arc<RwLock<DispatchState>>,
    pending: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Start the worker thread. Device futures run on `runtime`.
    pub fn spawn(
        device: Arc<dyn DeviceDataSource>,
        device_cache: DeviceCache,
        store: StateStore,
        config: DispatchConfig,
        runtime: Handle,
    ) -> std::io::Result<(DispatcherHandle, JoinHandle<()>)> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let state = Arc::new(RwLock::new(DispatchState::default()));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Self {
            device,
            device_cache,
            store,
            config,
            state: Arc::clone(&state),
            pending: Arc::clone(&pending),
        };

        let join = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || worker.run(receiver, runtime))?;

        let handle = DispatcherHandle {
            sender,
            state,
            pending,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        Ok((handle, join))
    }

    fn run(self, receiver: Receiver<DispatchMessage>, runtime: Handle) {
        info!(
            "🔌 Command dispatcher started (device: {}, dry_run: {})",
            self.device.name(),
            self.config.dry_run
        );

        while let Ok(message) = receiver.recv() {
            match message {
                DispatchMessage::Run(request) => {
                    runtime.block_on(self.process(request));
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
                DispatchMessage::Shutdown => break,
            }
        }

        warn!("🔌 Command dispatcher stopped");
    }

    async fn process(&self, request: CommandRequest) {
        {
            let mut state = self.state.write();
            state.op_state = OpState::Applying;
            state.op_kind = Some(request.kind);
            state.request_id = Some(request.id);
            state.started_at = Some(Utc::now());
        }
        info!(
            "⚙️ [DISPATCH] #{} {} from {:?}",
            request.id, request.kind, request.source
        );

        if self.config.dry_run {
            info!("🧪 DRY RUN: not sending {} to the device", request.kind);
            self.finish(OpState::Idle, None);
            return;
        }

        match self.execute(request.kind).await {
            Ok(patch) => {
                self.persist(patch);
                info!("✅ [DISPATCH] #{} {} confirmed", request.id, request.kind);
                self.finish(OpState::Idle, None);
            }
            Err(e) => {
                error!("❌ [DISPATCH] #{} {} failed: {}", request.id, request.kind, e);
                self.finish(OpState::Error, Some(e.to_string()));
            }
        }
    }

    /// Failing to persist never fails the command; the device did apply it
    fn persist(&self, patch: ControlStatePatch) {
        if let Err(e) = self.store.save(patch) {
            error!("❌ Device state confirmed but not persisted: {:#}", e);
        }
    }

    fn finish(&self, op_state: OpState, error: Option<String>) {
        let mut state = self.state.write();
        state.op_state = op_state;
        state.finished_at = Some(Utc::now());
        state.last_error = error;
    }

    fn set_op_state(&self, op_state: OpState) {
        self.state.write().op_state = op_state;
    }

    async fn execute(&self, kind: CommandKind) -> Result<ControlStatePatch, DispatchError> {
        match kind {
            CommandKind::Stop | CommandKind::SetPowerPercent { percent: 0 } => self.stop().await,
            CommandKind::Resume => {
                self.resume().await?;
                Ok(ControlStatePatch::new().device_power_state(DevicePowerState::Running))
            }
            CommandKind::SetPowerLimit { watts } => {
                self.apply_limit(watts).await?;
                Ok(ControlStatePatch::new()
                    .target_power_pct(watts_to_percent(watts, self.config.base_watts)))
            }
            CommandKind::SetPowerPercent { percent } => {
                if !self.currently_mining().await {
                    self.resume().await?;
                    // Confirmed running even if the limit step below fails
                    self.persist(
                        ControlStatePatch::new().device_power_state(DevicePowerState::Running),
                    );
                }

                let watts = percent_to_watts(percent, self.config.base_watts);
                self.set_op_state(OpState::Applying);
                self.device
                    .set_power_limit(watts)
                    .await
                    .map_err(DispatchError::Device)?;
                self.set_op_state(OpState::Verifying);
                self.verify("mining at power limit", |s| {
                    s.mining && s.power_limit_w == Some(watts)
                })
                .await?;

                Ok(ControlStatePatch::new()
                    .device_power_state(DevicePowerState::Running)
                    .target_power_pct(percent))
            }
        }
    }

    async fn stop(&self) -> Result<ControlStatePatch, DispatchError> {
        self.device.stop().await.map_err(DispatchError::Device)?;
        self.set_op_state(OpState::Verifying);
        self.verify("mining stopped", |s| !s.mining).await?;

        Ok(ControlStatePatch::new()
            .device_power_state(DevicePowerState::Stopped)
            .target_power_pct(0))
    }

    async fn resume(&self) -> Result<(), DispatchError> {
        self.set_op_state(OpState::Applying);
        self.device.resume().await.map_err(DispatchError::Device)?;
        self.set_op_state(OpState::Verifying);
        self.verify("mining resumed", |s| s.mining).await?;
        Ok(())
    }

    async fn apply_limit(&self, watts: u32) -> Result<(), DispatchError> {
        self.device
            .set_power_limit(watts)
            .await
            .map_err(DispatchError::Device)?;
        self.set_op_state(OpState::Verifying);
        self.verify("power limit", |s| s.power_limit_w == Some(watts))
            .await?;
        Ok(())
    }

    /// Whether the device is hashing right now; falls back to the persisted state
    /// when the device does not answer.
    async fn currently_mining(&self) -> bool {
        match self.device.read_status().await {
            Ok(Some(snapshot)) => {
                let mining = snapshot.mining;
                self.device_cache.update(snapshot);
                mining
            }
            Ok(None) | Err(_) => {
                self.store.load().device_power_state == DevicePowerState::Running
            }
        }
    }

    /// Re-read the device until `check` holds or the verification window closes
    async fn verify(
        &self,
        what: &str,
        check: impl Fn(&DeviceSnapshot) -> bool,
    ) -> Result<DeviceSnapshot, DispatchError> {
        let deadline = Instant::now() + self.config.verify_timeout;
        let mut last_seen = String::from("no reply");

        loop {
            match self.device.read_status().await {
                Ok(Some(snapshot)) => {
                    self.device_cache.update(snapshot.clone());
                    if check(&snapshot) {
                        debug!("🔍 Verified: {}", what);
                        return Ok(snapshot);
                    }
                    last_seen = format!(
                        "mining={}, limit={}",
                        snapshot.mining,
                        snapshot
                            .power_limit_w
                            .map_or_else(|| "unknown".to_owned(), |w| format!("{w}W"))
                    );
                }
                Ok(None) => debug!("Device silent during verification of {}", what),
                Err(e) => {
                    debug!("Verification read failed: {:#}", e);
                    last_seen = format!("read error: {e:#}");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            Delay::new(self.config.verify_interval.min(deadline - now)).await;
        }

        Err(DispatchError::Verification(format!(
            "{what} not confirmed within {}s (last seen: {last_seen})",
            self.config.verify_timeout.as_secs()
        )))
    }
}
