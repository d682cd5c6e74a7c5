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

pub mod autocontrol;
pub mod command;
pub mod control;
pub mod telemetry;

// Re-export common types for convenience
pub use autocontrol::{
    AutoControlMode, AutoControlStatus, PowerIntent, percent_to_watts, watts_to_percent,
};
pub use command::{CommandKind, CommandRequest, CommandSource, DispatchState, OpState};
pub use control::{ControlState, ControlStatePatch, DevicePowerState};
pub use telemetry::{BatterySnapshot, ConnectionStatus, DeviceSnapshot};
