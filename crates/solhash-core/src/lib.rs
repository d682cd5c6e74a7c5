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

pub mod config;
pub mod control;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod policy;
pub mod store;
pub mod sunset;
pub mod telemetry;
pub mod traits;
pub mod workers;

#[cfg(test)]
mod test_support;

pub use config::{AutoControlConfig, DispatchConfig};
pub use control::AutoControlHandle;
pub use device::{ProtocolDevice, snapshot_from_summary};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use engine::{CycleOutcome, DecisionEngine, EngineCommand};
pub use error::{ControlError, DispatchError};
pub use policy::{
    Decision, LatchedFloor, RateLimiter, Rule, RuleInputs, RuleThresholds, SkipReason,
    decile_tier, evaluate_rules,
};
pub use store::{DEFAULT_STATE_PATH, StateStore};
pub use sunset::{SunsetCalculator, solar_sunset_utc};
pub use telemetry::{
    BatteryCache, BatteryPoller, DeviceCache, DevicePoller, TelemetryCache, Timestamped,
};
pub use traits::{BatteryDataSource, DeviceDataSource};
pub use workers::{ControlSystem, ControlSystemConfig};
