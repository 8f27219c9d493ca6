//! System collectors: CPU, memory, disks, disk throughput, thermal state,
//! pending updates, and the OS event log.

use std::sync::Arc;

use sysinfo::{Components, Disks, System};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vuwatch_shared::telemetry::{DiskIoTelemetry, EventLogSummary, SystemTelemetry};

use super::{
    CPU_INTERVAL, DISK_INTERVAL, DISK_IO_INTERVAL, EVENT_LOG_INTERVAL, THERMAL_INTERVAL,
    UPDATES_INTERVAL,
};

/// Component temperature above which the host is considered throttling.
const THROTTLE_TEMP_C: f32 = 90.0;

/// Cached system metrics; single conceptual writer (the system loops),
/// multi-reader through the assembler.
#[derive(Debug, Clone, Default)]
pub struct SystemCache {
    pub cpu_percent: f32,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub ram_total_mb: u64,
    pub ram_used_mb: u64,
    pub ram_percent: f32,
    pub disk_total_gb: f64,
    pub disk_used_gb: f64,
    pub disk_percent: f32,
    pub disk_io: DiskIoTelemetry,
    pub thermal_throttling: bool,
    pub pending_updates: u32,
    pub event_log: EventLogSummary,
    pub uptime_seconds: u64,
    pub probe_failures: u32,
}

impl SystemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_telemetry(&self) -> SystemTelemetry {
        SystemTelemetry {
            cpu_percent: self.cpu_percent,
            cpu_model: self.cpu_model.clone(),
            cpu_cores: self.cpu_cores,
            ram_total_mb: self.ram_total_mb,
            ram_used_mb: self.ram_used_mb,
            ram_percent: self.ram_percent,
            gpu: None,
            disk_total_gb: self.disk_total_gb,
            disk_used_gb: self.disk_used_gb,
            disk_percent: self.disk_percent,
            disk_io: self.disk_io.clone(),
            thermal_throttling: self.thermal_throttling,
            pending_updates: self.pending_updates,
            event_log: self.event_log.clone(),
            uptime_seconds: self.uptime_seconds,
        }
    }
}

/// Spawn all system sampler loops.
pub fn spawn(cache: Arc<RwLock<SystemCache>>) -> Vec<JoinHandle<()>> {
    vec![
        spawn_cpu_loop(Arc::clone(&cache)),
        spawn_disk_loop(Arc::clone(&cache)),
        spawn_disk_io_loop(Arc::clone(&cache)),
        spawn_thermal_loop(Arc::clone(&cache)),
        spawn_updates_loop(Arc::clone(&cache)),
        spawn_event_log_loop(cache),
    ]
}

fn spawn_cpu_loop(cache: Arc<RwLock<SystemCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        // Static facts, read once.
        let cpu_model = system
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_default();
        let cpu_cores = system.cpus().len() as u32;
        {
            let mut c = cache.write().await;
            c.cpu_model = cpu_model;
            c.cpu_cores = cpu_cores;
        }

        let mut interval = tokio::time::interval(CPU_INTERVAL);
        loop {
            interval.tick().await;
            system.refresh_cpu_usage();
            system.refresh_memory();

            let total = system.total_memory();
            let used = system.used_memory();
            let mut c = cache.write().await;
            c.cpu_percent = system.global_cpu_usage();
            c.ram_total_mb = total / 1024 / 1024;
            c.ram_used_mb = used / 1024 / 1024;
            c.ram_percent = if total > 0 {
                (used as f32 / total as f32) * 100.0
            } else {
                0.0
            };
            c.uptime_seconds = System::uptime();
        }
    })
}

fn spawn_disk_loop(cache: Arc<RwLock<SystemCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DISK_INTERVAL);
        loop {
            interval.tick().await;
            let disks = Disks::new_with_refreshed_list();
            let mut total: u64 = 0;
            let mut available: u64 = 0;
            for disk in disks.list() {
                if disk.is_removable() {
                    continue;
                }
                total += disk.total_space();
                available += disk.available_space();
            }
            if total == 0 {
                let mut c = cache.write().await;
                c.probe_failures += 1;
                continue;
            }
            let used = total.saturating_sub(available);
            let mut c = cache.write().await;
            c.disk_total_gb = total as f64 / 1e9;
            c.disk_used_gb = used as f64 / 1e9;
            c.disk_percent = (used as f64 / total as f64 * 100.0) as f32;
        }
    })
}

fn spawn_disk_io_loop(cache: Arc<RwLock<SystemCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<(u64, u64)> = None;
        let mut interval = tokio::time::interval(DISK_IO_INTERVAL);
        loop {
            interval.tick().await;
            let content = match tokio::fs::read_to_string("/proc/diskstats").await {
                Ok(c) => c,
                Err(e) => {
                    debug!("diskstats read failed: {}", e);
                    cache.write().await.probe_failures += 1;
                    continue;
                }
            };
            let (read_sectors, write_sectors) = parse_diskstats(&content);
            if let Some((prev_read, prev_write)) = last {
                let secs = DISK_IO_INTERVAL.as_secs_f64();
                let read_mb_s =
                    read_sectors.saturating_sub(prev_read) as f64 * 512.0 / 1e6 / secs;
                let write_mb_s =
                    write_sectors.saturating_sub(prev_write) as f64 * 512.0 / 1e6 / secs;
                let mut c = cache.write().await;
                c.disk_io = DiskIoTelemetry { read_mb_s, write_mb_s };
            }
            last = Some((read_sectors, write_sectors));
        }
    })
}

fn spawn_thermal_loop(cache: Arc<RwLock<SystemCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(THERMAL_INTERVAL);
        loop {
            interval.tick().await;
            let components = Components::new_with_refreshed_list();
            let max_temp = components
                .list()
                .iter()
                .filter_map(|c| c.temperature())
                .fold(f32::MIN, f32::max);
            let throttling = max_temp > THROTTLE_TEMP_C;
            cache.write().await.thermal_throttling = throttling;
        }
    })
}

fn spawn_updates_loop(cache: Arc<RwLock<SystemCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPDATES_INTERVAL);
        loop {
            interval.tick().await;
            match count_pending_updates().await {
                Some(count) => cache.write().await.pending_updates = count,
                None => {
                    debug!("pending-update probe failed, keeping cached value");
                    cache.write().await.probe_failures += 1;
                }
            }
        }
    })
}

fn spawn_event_log_loop(cache: Arc<RwLock<SystemCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVENT_LOG_INTERVAL);
        loop {
            interval.tick().await;
            match scan_event_log().await {
                Some(summary) => cache.write().await.event_log = summary,
                None => {
                    warn!("event-log scan failed, keeping cached value");
                    cache.write().await.probe_failures += 1;
                }
            }
        }
    })
}

/// Sum sectors read/written across physical block devices.
fn parse_diskstats(content: &str) -> (u64, u64) {
    let mut read_sectors: u64 = 0;
    let mut write_sectors: u64 = 0;
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if !is_physical_disk(name) {
            continue;
        }
        read_sectors += fields[5].parse::<u64>().unwrap_or(0);
        write_sectors += fields[9].parse::<u64>().unwrap_or(0);
    }
    (read_sectors, write_sectors)
}

/// Whole-device names only; partitions would double-count.
fn is_physical_disk(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix("nvme") {
        // nvme0n1 is a device, nvme0n1p1 a partition.
        return rest.contains('n') && !rest.contains('p');
    }
    for prefix in ["sd", "hd", "vd", "xvd"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic());
        }
    }
    if name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    false
}

/// Count pending package updates: `checkupdates` on Arch-likes, then a
/// simulated apt upgrade as fallback.
async fn count_pending_updates() -> Option<u32> {
    if let Ok(output) = tokio::process::Command::new("checkupdates").output().await {
        // Exit code 2 means "no updates" for checkupdates.
        if output.status.success() || output.status.code() == Some(2) {
            let count = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .count();
            return Some(count as u32);
        }
    }

    let output = tokio::process::Command::new("apt-get")
        .args(["-s", "upgrade"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let count = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| l.starts_with("Inst "))
        .count();
    Some(count as u32)
}

/// Summarize recent OS-level errors from the journal.
async fn scan_event_log() -> Option<EventLogSummary> {
    let output = tokio::process::Command::new("journalctl")
        .args(["-p", "3", "--since", "10 minutes ago", "--no-pager", "-n", "100"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(summarize_journal(&stdout))
}

fn summarize_journal(output: &str) -> EventLogSummary {
    let lines: Vec<&str> = output
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with("-- "))
        .collect();
    EventLogSummary {
        recent_count: lines.len() as u32,
        last_message: lines.last().map(|l| truncate(l, 240)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diskstats_skips_partitions() {
        let content = "\
   8       0 sda 1000 0 20000 0 500 0 8000 0 0 0 0
   8       1 sda1 900 0 18000 0 400 0 7000 0 0 0 0
 259       0 nvme0n1 2000 0 40000 0 600 0 12000 0 0 0 0
 259       1 nvme0n1p1 100 0 2000 0 50 0 1000 0 0 0 0
   7       0 loop0 50 0 900 0 0 0 0 0 0 0 0";
        let (read, write) = parse_diskstats(content);
        assert_eq!(read, 60_000);
        assert_eq!(write, 20_000);
    }

    #[test]
    fn test_is_physical_disk() {
        assert!(is_physical_disk("sda"));
        assert!(is_physical_disk("nvme0n1"));
        assert!(is_physical_disk("vdb"));
        assert!(!is_physical_disk("sda2"));
        assert!(!is_physical_disk("nvme0n1p2"));
        assert!(!is_physical_disk("loop0"));
        assert!(!is_physical_disk("dm-0"));
    }

    #[test]
    fn test_summarize_journal() {
        let output = "Jan 02 10:00:00 host kernel: oops one\nJan 02 10:01:00 host app[12]: oops two\n";
        let summary = summarize_journal(output);
        assert_eq!(summary.recent_count, 2);
        assert!(summary.last_message.unwrap().contains("oops two"));
    }

    #[test]
    fn test_summarize_journal_empty() {
        let summary = summarize_journal("-- No entries --\n");
        assert_eq!(summary.recent_count, 0);
        assert!(summary.last_message.is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo wörld";
        let t = truncate(s, 2);
        assert!(t.len() <= 2);
    }
}
