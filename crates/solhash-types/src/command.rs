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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device-mutating command kinds accepted by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    Stop,
    Resume,
    /// Absolute power limit in watts
    SetPowerLimit { watts: u32 },
    /// Power as a percentage of the configured base capacity
    SetPowerPercent { percent: u8 },
}

impl CommandKind {
    /// Short stable name used in logs and status output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Resume => "resume",
            Self::SetPowerLimit { .. } => "set_power_limit",
            Self::SetPowerPercent { .. } => "set_power_percent",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop | Self::Resume => write!(f, "{}", self.name()),
            Self::SetPowerLimit { watts } => write!(f, "{} ({}W)", self.name(), watts),
            Self::SetPowerPercent { percent } => write!(f, "{} ({}%)", self.name(), percent),
        }
    }
}

/// Who issued a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    /// Decision engine
    Auto,
    /// Operator via the control surface
    Manual,
}

/// A queued command, owned by the dispatcher from enqueue to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Monotonic id assigned at enqueue
    pub id: u64,
    pub kind: CommandKind,
    pub source: CommandSource,
    pub enqueued_at: DateTime<Utc>,
}

/// Dispatcher operation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpState {
    #[default]
    Idle,
    Applying,
    Verifying,
    Error,
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the dispatcher, written only by the dispatcher worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchState {
    pub op_state: OpState,

    /// Kind of the command currently (or last) handled
    pub op_kind: Option<CommandKind>,

    pub last_error: Option<String>,

    /// When the current (or last) command was dequeued
    pub started_at: Option<DateTime<Utc>>,

    /// When the last command finished, successfully or not
    pub finished_at: Option<DateTime<Utc>>,

    /// Id of the current (or last) request
    pub request_id: Option<u64>,

    /// Commands queued or in flight
    pub pending: usize,
}

impl DispatchState {
    /// True while a command is being applied or verified, or more are queued
    pub fn is_busy(&self) -> bool {
        self.pending > 0 || matches!(self.op_state, OpState::Applying | OpState::Verifying)
    }
}
