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

//! Telemetry caches and their pollers.
//!
//! Each cache holds the latest snapshot of one source plus its connection status.
//! Readers never block on a poll and never see a poll error: a failed poll keeps
//! the last-known-good snapshot and only updates the connection status.

use crate::traits::{BatteryDataSource, DeviceDataSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use solhash_types::{BatterySnapshot, ConnectionStatus, DeviceSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Snapshots that carry their capture time
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for DeviceSnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for BatterySnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    latest: Option<T>,
    connection: ConnectionStatus,
}

/// Shared latest-value cache. Cloning shares the same slot.
#[derive(Debug)]
pub struct TelemetryCache<T> {
    inner: Arc<RwLock<CacheInner<T>>>,
}

impl<T> Clone for TelemetryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for TelemetryCache<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                latest: None,
                connection: ConnectionStatus::default(),
            })),
        }
    }
}

pub type DeviceCache = TelemetryCache<DeviceSnapshot>;
pub type BatteryCache = TelemetryCache<BatterySnapshot>;

impl<T: Timestamped + Clone> TelemetryCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot regardless of age
    pub fn latest(&self) -> Option<T> {
        self.inner.read().latest.clone()
    }

    /// Age of the latest snapshot at `now`
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.inner
            .read()
            .latest
            .as_ref()
            .map(|s| now - s.timestamp())
    }

    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.fresh(max_age, now).is_some()
    }

    /// Latest snapshot if it is not older than `max_age`
    pub fn fresh(&self, max_age: Duration, now: DateTime<Utc>) -> Option<T> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let guard = self.inner.read();
        guard
            .latest
            .as_ref()
            .filter(|s| now - s.timestamp() <= max_age)
            .cloned()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.inner.read().connection.clone()
    }

    /// Store a new snapshot
    pub fn update(&self, snapshot: T) {
        let mut guard = self.inner.write();
        let ts = snapshot.timestamp();
        guard.connection.mark_success(ts);
        guard.latest = Some(snapshot);
    }

    /// Record a failed poll; the previous snapshot stays in place
    pub fn record_failure(&self, error: impl Into<String>) {
        self.inner.write().connection.mark_failure(error);
    }
}

/// Polls the device into a `DeviceCache`
#[derive(Clone)]
pub struct DevicePoller {
    source: Arc<dyn DeviceDataSource>,
    cache: DeviceCache,
}

impl DevicePoller {
    pub fn new(source: Arc<dyn DeviceDataSource>, cache: DeviceCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &DeviceCache {
        &self.cache
    }

    /// Poll once and update the cache
    pub async fn poll_once(&self) -> Result<Option<DeviceSnapshot>> {
        match self.source.read_status().await {
            Ok(Some(snapshot)) => {
                self.cache.update(snapshot.clone());
                Ok(Some(snapshot))
            }
            Ok(None) => {
                debug!("{} returned no data, keeping last snapshot", self.source.name());
                Ok(None)
            }
            Err(e) => {
                self.cache.record_failure(format!("{e:#}"));
                Err(e)
            }
        }
    }

    pub fn spawn(self, interval: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let name = self.source.name().to_owned();
        tokio::spawn(run_poll_loop(name, interval, shutdown, move || {
            let poller = self.clone();
            async move { poller.poll_once().await.map(|s| s.is_some()) }
        }))
    }
}

/// Polls battery telemetry into a `BatteryCache`
#[derive(Clone)]
pub struct BatteryPoller {
    source: Arc<dyn BatteryDataSource>,
    cache: BatteryCache,
}

impl BatteryPoller {
    pub fn new(source: Arc<dyn BatteryDataSource>, cache: BatteryCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &BatteryCache {
        &self.cache
    }

    pub async fn poll_once(&self) -> Result<BatterySnapshot> {
        match self.source.read_battery().await {
            Ok(snapshot) => {
                debug!(
                    "🔋 [BATTERY] soc={:.1}% pv={:.0}W load={:.0}W",
                    snapshot.soc_percent, snapshot.pv_power_w, snapshot.load_power_w
                );
                self.cache.update(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                self.cache.record_failure(format!("{e:#}"));
                Err(e)
            }
        }
    }

    pub fn spawn(self, interval: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let name = self.source.name().to_owned();
        tokio::spawn(run_poll_loop(name, interval, shutdown, move || {
            let poller = self.clone();
            async move { poller.poll_once().await.map(|_| true) }
        }))
    }
}

/// Shared poll loop: first poll immediately, then one per tick until shutdown
async fn run_poll_loop<F, Fut>(
    name: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut poll: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = Result<bool>> + Send,
{
    info!("📡 Telemetry poller for {} started ({:?})", name, interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match poll().await {
            Ok(_) => {
                if failures > 0 {
                    info!("✅ {} recovered after {} failed polls", name, failures);
                }
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                // Log the first failure loudly, then keep quiet until recovery
                if failures == 1 {
                    warn!("⚠️ Poll of {} failed: {:#}", name, e);
                } else {
                    debug!("Poll of {} failed ({} in a row): {:#}", name, failures, e);
                }
            }
        }
    }

    info!("📡 Telemetry poller for {} stopped", name);
}
