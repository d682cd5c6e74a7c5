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

mod validation;

use validation::ValidationResult;

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use solhash_core::{AutoControlConfig, ControlSystemConfig, DispatchConfig, RuleThresholds};
use solhash_types::AutoControlMode;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config files tried in the working directory when no path is given
const DEFAULT_CONFIG_FILES: [&str; 2] = ["config.local.toml", "config.toml"];

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SOLHASH_CONFIG";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Controlled ASIC device
    pub device: DeviceConfig,

    /// Battery telemetry from Home Assistant
    pub battery: BatteryConfig,

    /// Decision engine and dispatcher
    pub autocontrol: AutoControlSettings,

    pub system: SystemConfig,
}

/// Device connection
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    /// Device password for privileged commands
    pub credential: Option<String>,
    /// Nominal full power (W); 100% maps to this
    pub base_watts: u32,
    pub poll_seconds: u64,
    pub timeout_secs: u64,
    pub max_age_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: solhash_protocol::DEFAULT_PORT,
            credential: None,
            base_watts: 3600,
            poll_seconds: 10,
            timeout_secs: 5,
            max_age_secs: 60,
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("base_watts", &self.base_watts)
            .field("poll_seconds", &self.poll_seconds)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

/// Battery sensors in Home Assistant
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Falls back to `HA_BASE_URL`, then `http://localhost:8123`
    pub ha_base_url: Option<String>,
    /// Falls back to `HA_TOKEN`
    pub ha_token: Option<String>,
    pub soc_entity: String,
    pub pv_power_entity: String,
    pub load_power_entity: String,
    pub battery_power_entity: Option<String>,
    pub poll_seconds: u64,
    pub max_age_secs: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            ha_base_url: None,
            ha_token: None,
            soc_entity: "sensor.battery_soc".to_owned(),
            pv_power_entity: "sensor.pv_power".to_owned(),
            load_power_entity: "sensor.load_power".to_owned(),
            battery_power_entity: None,
            poll_seconds: 10,
            max_age_secs: 90,
        }
    }
}

impl fmt::Debug for BatteryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatteryConfig")
            .field("ha_base_url", &self.ha_base_url)
            .field("ha_token", &self.ha_token.as_ref().map(|_| "<redacted>"))
            .field("soc_entity", &self.soc_entity)
            .field("pv_power_entity", &self.pv_power_entity)
            .field("load_power_entity", &self.load_power_entity)
            .field("battery_power_entity", &self.battery_power_entity)
            .field("poll_seconds", &self.poll_seconds)
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

/// Auto-control thresholds, intervals and location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoControlSettings {
    /// Force auto-control on at startup (otherwise the persisted flag decides)
    pub enabled: bool,
    pub mode: String,
    pub eval_interval_secs: u64,
    /// Minimum time between two automatic changes
    pub min_interval_sec: u64,
    /// Minimum change in percent worth sending
    pub min_delta_pct: u8,
    pub emergency_soc: f64,
    /// Solar power (W) counted as surplus
    pub max_pv_power: f64,
    pub high_soc_threshold: f64,
    pub high_soc_pct: u8,
    pub after_sunset_min_soc: f64,
    pub device_off_watts: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    /// Used when no astronomical sunset exists
    pub sunset_hour: u32,
    pub sunset_minute: u32,
    pub verify_timeout_secs: u64,
    pub verify_interval_secs: u64,
}

impl Default for AutoControlSettings {
    fn default() -> Self {
        let thresholds = RuleThresholds::default();
        Self {
            enabled: false,
            mode: AutoControlMode::Away.as_str().to_owned(),
            eval_interval_secs: 20,
            min_interval_sec: 60,
            min_delta_pct: 5,
            emergency_soc: thresholds.emergency_soc,
            max_pv_power: thresholds.max_pv_power_w,
            high_soc_threshold: thresholds.high_soc_threshold,
            high_soc_pct: thresholds.high_soc_pct,
            after_sunset_min_soc: thresholds.after_sunset_min_soc,
            device_off_watts: 100.0,
            latitude: 40.0,
            longitude: -74.0,
            timezone: "America/New_York".to_owned(),
            sunset_hour: 19,
            sunset_minute: 0,
            verify_timeout_secs: 45,
            verify_interval_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub state_path: String,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub log_level: String,

    /// Log device commands without sending them
    pub dry_run: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            state_path: solhash_core::DEFAULT_STATE_PATH.to_owned(),
            log_level: "info".to_owned(),
            dry_run: false,
        }
    }
}

impl AppConfig {
    /// Locate and parse the config file: explicit path, then `SOLHASH_CONFIG`, then
    /// `config.local.toml` / `config.toml`, then defaults. Environment overrides and
    /// validation are separate steps.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| {
                DEFAULT_CONFIG_FILES
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
            });

        match path {
            Some(path) => Self::from_file(&path),
            None => {
                warn!("No configuration file found, using defaults with environment overrides");
                Ok(Self::default())
            }
        }
    }

    /// Parse a TOML file without applying overrides or validating
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("✅ Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `DEVICE_HOST`, `DEVICE_PASSWORD`, `DEVICE_BASE_WATTS`, `POLL_SECONDS`,
    /// `HA_BASE_URL`, `HA_TOKEN` and `STATE_PATH` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("DEVICE_HOST") {
            self.device.host = host;
        }
        if let Some(password) = lookup("DEVICE_PASSWORD") {
            self.device.credential = Some(password);
        }
        if let Some(watts) = lookup("DEVICE_BASE_WATTS") {
            match watts.parse::<u32>() {
                Ok(watts) => self.device.base_watts = watts,
                Err(_) => warn!("Ignoring DEVICE_BASE_WATTS='{}': not a number", watts),
            }
        }
        if let Some(secs) = lookup("POLL_SECONDS") {
            match secs.parse::<u64>() {
                Ok(secs) => {
                    self.device.poll_seconds = secs;
                    self.battery.poll_seconds = secs;
                }
                Err(_) => warn!("Ignoring POLL_SECONDS='{}': not a number", secs),
            }
        }
        if let Some(url) = lookup("HA_BASE_URL") {
            self.battery.ha_base_url = Some(url);
        }
        if let Some(token) = lookup("HA_TOKEN") {
            self.battery.ha_token = Some(token);
        }
        if let Some(path) = lookup("STATE_PATH") {
            self.system.state_path = path;
        }
    }

    /// Validate configuration with detailed error reporting
    pub fn validate_detailed(&self) -> ValidationResult {
        let mut result = ValidationResult::success();
        result.merge(self.validate_device());
        result.merge(self.validate_battery());
        result.merge(self.validate_autocontrol());
        result.merge(self.validate_system());
        result
    }

    fn validate_device(&self) -> ValidationResult {
        let mut result = ValidationResult::success();
        let device = &self.device;

        if device.host.trim().is_empty() {
            result.add_error("device.host", "Device host is required");
        }
        if device.port == 0 {
            result.add_error("device.port", "Port must be non-zero");
        }
        if device.credential.as_deref().is_none_or(str::is_empty) {
            result.add_error(
                "device.credential",
                "Device password is required for power commands (or set DEVICE_PASSWORD)",
            );
        }
        if device.base_watts == 0 || device.base_watts > 99_999 {
            result.add_error("device.base_watts", "Base watts must be within 1-99999");
        }
        if device.poll_seconds == 0 {
            result.add_error("device.poll_seconds", "Poll interval must be at least 1s");
        }
        if device.timeout_secs == 0 {
            result.add_error("device.timeout_secs", "Timeout must be at least 1s");
        }
        if device.max_age_secs <= device.poll_seconds {
            result.add_warning(
                "device.max_age_secs",
                "Max age not above the poll interval; device data will often look stale",
            );
        }

        result
    }

    fn validate_battery(&self) -> ValidationResult {
        let mut result = ValidationResult::success();
        let battery = &self.battery;

        for (field, value) in [
            ("battery.soc_entity", &battery.soc_entity),
            ("battery.pv_power_entity", &battery.pv_power_entity),
            ("battery.load_power_entity", &battery.load_power_entity),
        ] {
            if value.trim().is_empty() {
                result.add_error(field, "Entity id cannot be empty");
            }
        }
        if battery.ha_token.as_deref().is_none_or(str::is_empty) {
            result.add_warning(
                "battery.ha_token",
                "No token configured; HA_TOKEN must be set at startup",
            );
        }
        if battery.poll_seconds == 0 {
            result.add_error("battery.poll_seconds", "Poll interval must be at least 1s");
        }
        if battery.max_age_secs <= battery.poll_seconds {
            result.add_warning(
                "battery.max_age_secs",
                "Max age not above the poll interval; cycles will often be skipped",
            );
        }

        result
    }

    fn validate_autocontrol(&self) -> ValidationResult {
        let mut result = ValidationResult::success();
        let ac = &self.autocontrol;

        match ac.mode.parse::<AutoControlMode>() {
            Ok(AutoControlMode::Away) => {}
            Ok(mode) => result.add_error(
                "autocontrol.mode",
                format!("Mode '{mode}' is not supported yet (use 'away')"),
            ),
            Err(e) => result.add_error("autocontrol.mode", e.to_string()),
        }

        if !(0.0..=100.0).contains(&ac.emergency_soc) {
            result.add_error("autocontrol.emergency_soc", "Must be within 0-100%");
        }
        if !(0.0..=100.0).contains(&ac.high_soc_threshold) {
            result.add_error("autocontrol.high_soc_threshold", "Must be within 0-100%");
        } else if ac.high_soc_threshold <= ac.emergency_soc {
            result.add_error(
                "autocontrol.high_soc_threshold",
                format!(
                    "Must be above emergency_soc ({}%), got {}%",
                    ac.emergency_soc, ac.high_soc_threshold
                ),
            );
        }
        if ac.high_soc_pct == 0 || ac.high_soc_pct > 100 {
            result.add_error("autocontrol.high_soc_pct", "Must be within 1-100%");
        }
        if ac.after_sunset_min_soc < ac.emergency_soc {
            result.add_warning(
                "autocontrol.after_sunset_min_soc",
                "Below emergency_soc; the emergency rule will win anyway",
            );
        }
        if ac.min_delta_pct > 100 {
            result.add_error("autocontrol.min_delta_pct", "Must be within 0-100%");
        }
        if ac.max_pv_power < 0.0 {
            result.add_error("autocontrol.max_pv_power", "Must not be negative");
        }
        if ac.device_off_watts < 0.0 {
            result.add_error("autocontrol.device_off_watts", "Must not be negative");
        }
        if ac.eval_interval_secs == 0 {
            result.add_error("autocontrol.eval_interval_secs", "Must be at least 1s");
        }
        if ac.verify_interval_secs == 0 {
            result.add_error("autocontrol.verify_interval_secs", "Must be at least 1s");
        }
        if ac.verify_timeout_secs < ac.verify_interval_secs {
            result.add_warning(
                "autocontrol.verify_timeout_secs",
                "Shorter than the verify interval; only one check will be made",
            );
        }
        if ac.min_interval_sec < ac.eval_interval_secs {
            result.add_warning(
                "autocontrol.min_interval_sec",
                "Shorter than the evaluation interval and has no effect",
            );
        }
        if !(-90.0..=90.0).contains(&ac.latitude) {
            result.add_error("autocontrol.latitude", "Must be within -90..90");
        }
        if !(-180.0..=180.0).contains(&ac.longitude) {
            result.add_error("autocontrol.longitude", "Must be within -180..180");
        }
        if ac.timezone.parse::<Tz>().is_err() {
            result.add_error(
                "autocontrol.timezone",
                format!("Unknown timezone '{}'", ac.timezone),
            );
        }
        if ac.sunset_hour > 23 || ac.sunset_minute > 59 {
            result.add_error(
                "autocontrol.sunset_hour",
                format!(
                    "Invalid fallback sunset {}:{:02}",
                    ac.sunset_hour, ac.sunset_minute
                ),
            );
        }

        result
    }

    fn validate_system(&self) -> ValidationResult {
        let mut result = ValidationResult::success();

        if self.system.state_path.trim().is_empty() {
            result.add_error("system.state_path", "State path cannot be empty");
        }
        if !LOG_LEVELS.contains(&self.system.log_level.to_lowercase().as_str()) {
            result.add_warning(
                "system.log_level",
                format!("Unknown log level '{}', using info", self.system.log_level),
            );
        }

        result
    }

    /// Validate and fail on the first error; warnings are logged
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_detailed();
        for warning in &result.warnings {
            warn!("⚠️ Config {}: {}", warning.field, warning.message);
        }
        if let Some(error) = result.first_error() {
            bail!(
                "Invalid configuration ({} error(s)), first: {}",
                result.errors.len(),
                error
            );
        }
        Ok(())
    }

    /// Worker configuration for the control core
    pub fn control_system_config(&self) -> Result<ControlSystemConfig> {
        let ac = &self.autocontrol;
        let mode: AutoControlMode = ac.mode.parse()?;
        let timezone: Tz = ac
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", ac.timezone, e))?;

        Ok(ControlSystemConfig {
            autocontrol: AutoControlConfig {
                enabled: ac.enabled,
                mode,
                eval_interval: Duration::from_secs(ac.eval_interval_secs),
                min_interval: Duration::from_secs(ac.min_interval_sec),
                min_delta_pct: ac.min_delta_pct,
                thresholds: RuleThresholds {
                    emergency_soc: ac.emergency_soc,
                    max_pv_power_w: ac.max_pv_power,
                    high_soc_threshold: ac.high_soc_threshold,
                    high_soc_pct: ac.high_soc_pct,
                    after_sunset_min_soc: ac.after_sunset_min_soc,
                },
                device_off_watts: ac.device_off_watts,
                battery_max_age: Duration::from_secs(self.battery.max_age_secs),
                device_max_age: Duration::from_secs(self.device.max_age_secs),
                latitude: ac.latitude,
                longitude: ac.longitude,
                timezone,
                sunset_fallback_hour: ac.sunset_hour,
                sunset_fallback_minute: ac.sunset_minute,
                base_watts: self.device.base_watts,
            },
            dispatch: DispatchConfig {
                base_watts: self.device.base_watts,
                verify_timeout: Duration::from_secs(ac.verify_timeout_secs),
                verify_interval: Duration::from_secs(ac.verify_interval_secs),
                dry_run: self.system.dry_run,
            },
            device_poll_interval: Duration::from_secs(self.device.poll_seconds),
            battery_poll_interval: Duration::from_secs(self.battery.poll_seconds),
        })
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device.timeout_secs)
    }
}
