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

use solhash_types::AutoControlMode;
use thiserror::Error;

/// Failure of one dispatched command
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Device call failed: {0:#}")]
    Device(anyhow::Error),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors returned by the control surface
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Auto-control mode '{0}' is not supported")]
    UnsupportedMode(AutoControlMode),

    #[error("Command queue is closed")]
    QueueClosed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
