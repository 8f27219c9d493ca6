//! Background metric collectors.
//!
//! Each collector owns its own timer loop and writes into a cached structure
//! behind an `RwLock`; the snapshot assembler only ever reads the caches.
//! A failed probe leaves the previous cached value intact and bumps an
//! internal failure counter. Collectors never block the assembler.

pub mod app;
pub mod gpu;
pub mod network;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::WatchdogConfig;

/// CPU / memory sampling cadence.
pub const CPU_INTERVAL: Duration = Duration::from_secs(2);
/// GPU probe cadence.
pub const GPU_INTERVAL: Duration = Duration::from_secs(5);
/// Disk usage aggregate cadence.
pub const DISK_INTERVAL: Duration = Duration::from_secs(60);
/// Disk throughput cadence.
pub const DISK_IO_INTERVAL: Duration = Duration::from_secs(5);
/// Thermal probe cadence.
pub const THERMAL_INTERVAL: Duration = Duration::from_secs(10);
/// Pending-update check cadence.
pub const UPDATES_INTERVAL: Duration = Duration::from_secs(300);
/// OS event-log scan cadence.
pub const EVENT_LOG_INTERVAL: Duration = Duration::from_secs(60);
/// Process presence cadence.
pub const PROCESS_INTERVAL: Duration = Duration::from_secs(5);
/// Server lock-file cadence (every publish tick).
pub const LOCK_INTERVAL: Duration = Duration::from_secs(2);
/// Application error-log cadence.
pub const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);
/// Internet reachability cadence.
pub const INTERNET_INTERVAL: Duration = Duration::from_secs(10);
/// Local server probe cadence.
pub const LOCAL_SERVER_INTERVAL: Duration = Duration::from_secs(3);

/// Handles to every collector cache.
#[derive(Clone)]
pub struct CollectorSet {
    pub system: Arc<RwLock<system::SystemCache>>,
    pub gpu: Arc<RwLock<gpu::GpuCache>>,
    pub network: Arc<RwLock<network::NetworkCache>>,
    pub app: Arc<RwLock<app::AppCache>>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self {
            system: Arc::new(RwLock::new(system::SystemCache::new())),
            gpu: Arc::new(RwLock::new(gpu::GpuCache::default())),
            network: Arc::new(RwLock::new(network::NetworkCache::default())),
            app: Arc::new(RwLock::new(app::AppCache::new())),
        }
    }

    /// Spawn every sampler loop. The returned handles are held by the
    /// orchestrator for shutdown.
    pub fn spawn_all(&self, config: &WatchdogConfig) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        handles.extend(system::spawn(Arc::clone(&self.system)));
        handles.push(gpu::spawn(Arc::clone(&self.gpu)));
        handles.extend(network::spawn(Arc::clone(&self.network), config));
        handles.extend(app::spawn(Arc::clone(&self.app), config));
        handles
    }
}

impl Default for CollectorSet {
    fn default() -> Self {
        Self::new()
    }
}
