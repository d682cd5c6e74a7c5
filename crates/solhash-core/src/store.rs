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

//! Persistence layer for control state.
//!
//! Handles loading and saving of `ControlState` to/from disk.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use solhash_types::{ControlState, ControlStatePatch};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Default path for control state file.
/// Uses relative path for portability.
pub const DEFAULT_STATE_PATH: &str = "./data/control_state.json";

/// Control state persistence manager.
///
/// Clones share one write lock so concurrent read-merge-write cycles from the
/// dispatcher and the control surface never interleave.
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Path to control state file.
    state_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Create a new persistence manager with the given path.
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a persistence manager using the default production path.
    pub fn default_production() -> Self {
        Self::new(DEFAULT_STATE_PATH)
    }

    /// Get the path being used for persistence.
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    /// Load control state from disk.
    ///
    /// Never fails: a missing, unreadable or corrupt file yields the defaults.
    pub fn load(&self) -> ControlState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!(
                    "Control state file not found at {}, using defaults",
                    self.state_path.display()
                );
                ControlState::default()
            }
            Err(e) => {
                warn!("⚠️ {:#}; using default control state", e);
                ControlState::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<ControlState>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.state_path).with_context(|| {
            format!(
                "Failed to read control state from {}",
                self.state_path.display()
            )
        })?;

        let state: ControlState = serde_json::from_str(&contents).with_context(|| {
            format!(
                "Failed to parse control state from {}",
                self.state_path.display()
            )
        })?;

        Ok(Some(state))
    }

    /// Merge `patch` into the current state on disk and write it back.
    ///
    /// Re-reads the file first, stamps `last_updated` and replaces the whole
    /// document atomically (temp file in the same directory, fsync, rename).
    pub fn save(&self, patch: ControlStatePatch) -> Result<ControlState> {
        let _guard = self.write_lock.lock();

        let mut state = self.load();
        patch.apply_to(&mut state);
        state.last_updated = Some(Utc::now());

        self.write_atomic(&state)?;

        info!(
            "💾 Saved control state (autocontrol={}, target={}%, device={})",
            state.autocontrol_enabled, state.target_power_pct, state.device_power_state
        );

        Ok(state)
    }

    fn write_atomic(&self, state: &ControlState) -> Result<()> {
        // Ensure parent directory exists
        let parent = match self.state_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            fs::create_dir_all(&parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize control state")?;

        let mut temp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        temp.write_all(json.as_bytes())
            .context("Failed to write temp control state")?;
        temp.as_file()
            .sync_all()
            .context("Failed to flush temp control state")?;
        temp.persist(&self.state_path).with_context(|| {
            format!(
                "Failed to rename temp file to {}",
                self.state_path.display()
            )
        })?;

        Ok(())
    }

    /// Check if a state file exists.
    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::default_production()
    }
}
