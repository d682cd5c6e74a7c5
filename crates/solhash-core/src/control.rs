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

//! Operator-facing control surface.

use crate::dispatcher::DispatcherHandle;
use crate::engine::EngineCommand;
use crate::error::ControlError;
use crate::store::StateStore;
use parking_lot::RwLock;
use solhash_types::{
    AutoControlMode, AutoControlStatus, CommandKind, CommandSource, ControlStatePatch,
    DispatchState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Cloneable handle for enabling auto-control, switching modes, reading state and
/// issuing manual commands. Manual commands share the dispatcher queue with the
/// engine's commands.
#[derive(Clone)]
pub struct AutoControlHandle {
    engine: mpsc::UnboundedSender<EngineCommand>,
    enabled: Arc<AtomicBool>,
    status: Arc<RwLock<AutoControlStatus>>,
    dispatcher: DispatcherHandle,
    store: StateStore,
}

impl AutoControlHandle {
    pub fn new(
        engine: mpsc::UnboundedSender<EngineCommand>,
        enabled: Arc<AtomicBool>,
        status: Arc<RwLock<AutoControlStatus>>,
        dispatcher: DispatcherHandle,
        store: StateStore,
    ) -> Self {
        Self {
            engine,
            enabled,
            status,
            dispatcher,
            store,
        }
    }

    /// Turn auto-control on; the next computed change is sent without waiting
    /// out the rate-limit interval.
    pub fn enable(&self) -> Result<(), ControlError> {
        self.set_enabled(true)?;
        self.notify(EngineCommand::Enable)
    }

    /// Turn auto-control off. Whatever the device was last told stays in place.
    pub fn disable(&self) -> Result<(), ControlError> {
        self.set_enabled(false)?;
        self.notify(EngineCommand::Disable)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_mode(&self, mode: AutoControlMode) -> Result<(), ControlError> {
        if mode != AutoControlMode::Away {
            return Err(ControlError::UnsupportedMode(mode));
        }
        self.notify(EngineCommand::SetMode(mode))
    }

    /// Current engine view
    pub fn get_state(&self) -> AutoControlStatus {
        let mut status = self.status.read().clone();
        status.enabled = self.is_enabled();
        status
    }

    pub fn enqueue_manual(&self, kind: CommandKind) -> Result<u64, ControlError> {
        info!("👤 Manual command: {}", kind);
        self.dispatcher.enqueue(kind, CommandSource::Manual)
    }

    pub fn dispatch_status(&self) -> DispatchState {
        self.dispatcher.status()
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.enabled.store(enabled, Ordering::SeqCst);
        // The flag still takes effect in memory if it cannot be persisted
        if let Err(e) = self
            .store
            .save(ControlStatePatch::new().autocontrol_enabled(enabled))
        {
            warn!("⚠️ Failed to persist auto-control flag: {:#}", e);
        }
        Ok(())
    }

    fn notify(&self, command: EngineCommand) -> Result<(), ControlError> {
        self.engine
            .send(command)
            .map_err(|_| ControlError::QueueClosed)
    }
}
