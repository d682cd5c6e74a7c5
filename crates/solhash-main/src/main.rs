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

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use config::AppConfig;
use solhash_core::{
    BatteryDataSource, ControlSystem, DeviceDataSource, ProtocolDevice, StateStore,
};
use solhash_ha::{BatteryEntities, HaBatterySource, HomeAssistantClient};
use solhash_protocol::DeviceClient;

#[derive(Debug, Parser)]
#[command(name = "solhash")]
#[command(version, about = "Battery-aware power control for a home ASIC miner", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration, print the findings and exit
    #[arg(long)]
    check_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_env_overrides();

    if cli.check_config {
        let result = config.validate_detailed();
        println!("{}", serde_json::to_string_pretty(&result)?);
        if result.has_errors() {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Respects RUST_LOG, falls back to the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.system.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    info!("🚀 Starting SolHash v{}", env!("CARGO_PKG_VERSION"));
    log_summary(&config);

    let control_config = config.control_system_config()?;

    // Device
    let client = DeviceClient::tcp(
        &config.device.host,
        config.device.port,
        config.device_timeout(),
        config.device.credential.clone(),
    );
    let device: Arc<dyn DeviceDataSource> = Arc::new(ProtocolDevice::new(client));
    info!("⛏️ Device data source: {}", device.name());
    match device.health_check().await {
        Ok(true) => info!("✅ Device reachable"),
        Ok(false) | Err(_) => warn!("⚠️ Device not reachable yet, polling will keep trying"),
    }

    // Battery telemetry
    info!("🏠 Initializing HA client from configuration...");
    let ha_client = HomeAssistantClient::from_config(
        config.battery.ha_base_url.clone(),
        config.battery.ha_token.clone(),
    )?;
    let battery: Arc<dyn BatteryDataSource> = Arc::new(HaBatterySource::new(
        ha_client,
        BatteryEntities {
            soc: config.battery.soc_entity.clone(),
            pv_power: config.battery.pv_power_entity.clone(),
            load_power: config.battery.load_power_entity.clone(),
            battery_power: config.battery.battery_power_entity.clone(),
        },
    ));
    info!("🔋 Battery data source: {}", battery.name());
    if !battery.health_check().await.unwrap_or(false) {
        warn!("⚠️ Home Assistant not reachable yet, auto-control waits for fresh battery data");
    }

    let store = StateStore::new(&config.system.state_path);
    let system = ControlSystem::start(device, battery, store, control_config)?;

    let state = system.control().get_state();
    info!(
        "🤖 Auto-control {} (mode {})",
        if state.enabled { "enabled" } else { "disabled" },
        state.mode
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    info!("🛑 Shutdown requested");
    system.shutdown().await;
    info!("👋 SolHash stopped");

    Ok(())
}

fn log_summary(config: &AppConfig) {
    let ac = &config.autocontrol;
    info!("📋 Configuration Summary:");
    info!(
        "   Device: {}:{} (base {}W, credential {})",
        config.device.host,
        config.device.port,
        config.device.base_watts,
        if config.device.credential.is_some() {
            "set"
        } else {
            "missing"
        }
    );
    info!(
        "   Battery entities: soc={}, pv={}, load={}",
        config.battery.soc_entity, config.battery.pv_power_entity, config.battery.load_power_entity
    );
    info!(
        "   Poll: device {}s, battery {}s, evaluate every {}s",
        config.device.poll_seconds, config.battery.poll_seconds, ac.eval_interval_secs
    );
    info!(
        "   Rules: emergency <{}%, high SOC >{}% -> {}%, post-sunset start >{}%",
        ac.emergency_soc, ac.high_soc_threshold, ac.high_soc_pct, ac.after_sunset_min_soc
    );
    info!(
        "   Rate limit: {}s, min delta {}%",
        ac.min_interval_sec, ac.min_delta_pct
    );
    info!(
        "   Location: {:.2}, {:.2} ({})",
        ac.latitude, ac.longitude, ac.timezone
    );
    info!("   State file: {}", config.system.state_path);
    if config.system.dry_run {
        warn!("⚠️ Dry run: device commands are logged, not sent");
    }
}
