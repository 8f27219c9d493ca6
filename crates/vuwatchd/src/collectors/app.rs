//! Application collectors: process presence, crash detection, the server
//! lock file, and the application error log.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vuwatch_shared::telemetry::{AppTelemetry, LockFileStatus, LogSummary};

use crate::config::WatchdogConfig;

use super::{ERROR_LOG_INTERVAL, LOCK_INTERVAL, PROCESS_INTERVAL};

/// Heartbeat age beyond which the lock is unhealthy.
pub const LOCK_STALE_MS: i64 = 15_000;

/// Error lines inside this window count as "recent".
const ERROR_WINDOW_MS: i64 = 600_000;

/// A detected target-app crash (PID changed between sightings).
#[derive(Debug, Clone)]
pub struct CrashInfo {
    pub old_pid: u32,
    pub new_pid: u32,
    pub at: i64,
}

#[derive(Debug)]
pub struct AppCache {
    pub vuos_running: bool,
    pub server_running: bool,
    pub vuos_memory_mb: Option<u64>,
    pub crash_count_today: u32,
    pub lock: Option<LockFileStatus>,
    pub log: LogSummary,
    /// Set on PID change; consumed by the orchestrator tick.
    pub crash_detected: Option<CrashInfo>,
    /// Last PID the target app was seen with. Survives disappearance so a
    /// reappearance under a new PID counts as a crash.
    last_vuos_pid: Option<u32>,
    crash_day: NaiveDate,
}

impl AppCache {
    pub fn new() -> Self {
        Self {
            vuos_running: false,
            server_running: false,
            vuos_memory_mb: None,
            crash_count_today: 0,
            lock: None,
            log: LogSummary::default(),
            crash_detected: None,
            last_vuos_pid: None,
            crash_day: Local::now().date_naive(),
        }
    }

    pub fn to_telemetry(&self, server_version: Option<String>) -> AppTelemetry {
        AppTelemetry {
            vuos_running: self.vuos_running,
            server_running: self.server_running,
            server_version,
            vuos_memory_mb: self.vuos_memory_mb,
            crash_count_today: self.crash_count_today,
            lock: self.lock.clone(),
            log: self.log.clone(),
        }
    }

    /// Take the pending crash marker, if any.
    pub fn take_crash(&mut self) -> Option<CrashInfo> {
        self.crash_detected.take()
    }

    /// Apply one process observation. Returns true when a crash was
    /// recorded. Disappearance alone does not count; the next reappearance
    /// with a different PID does.
    pub fn observe_process(
        &mut self,
        current_pid: Option<u32>,
        memory_mb: Option<u64>,
        today: NaiveDate,
        now_ms: i64,
    ) -> bool {
        if today != self.crash_day {
            self.crash_day = today;
            self.crash_count_today = 0;
        }

        self.vuos_running = current_pid.is_some();
        self.vuos_memory_mb = memory_mb;

        let mut crashed = false;
        if let Some(new_pid) = current_pid {
            if let Some(old_pid) = self.last_vuos_pid {
                if old_pid != new_pid {
                    self.crash_count_today += 1;
                    self.crash_detected = Some(CrashInfo { old_pid, new_pid, at: now_ms });
                    crashed = true;
                }
            }
            self.last_vuos_pid = Some(new_pid);
        }
        crashed
    }
}

impl Default for AppCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spawn(cache: Arc<RwLock<AppCache>>, config: &WatchdogConfig) -> Vec<JoinHandle<()>> {
    vec![
        spawn_process_loop(
            Arc::clone(&cache),
            config.app.vuos_process.clone(),
            config.app.server_process.clone(),
        ),
        spawn_lock_loop(Arc::clone(&cache), config.app.lock_file.clone()),
        spawn_error_log_loop(cache, config.app.log_file.clone()),
    ]
}

fn spawn_process_loop(
    cache: Arc<RwLock<AppCache>>,
    vuos_name: String,
    server_name: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new();
        let mut interval = tokio::time::interval(PROCESS_INTERVAL);
        loop {
            interval.tick().await;
            system.refresh_processes(ProcessesToUpdate::All, true);

            let mut vuos_pid: Option<u32> = None;
            let mut vuos_mem: Option<u64> = None;
            let mut server_seen = false;
            for (pid, process) in system.processes() {
                let name = process.name().to_string_lossy();
                if name == vuos_name.as_str() {
                    // Lowest PID wins if the app forks helpers.
                    let pid = pid.as_u32();
                    if vuos_pid.map(|existing| pid < existing).unwrap_or(true) {
                        vuos_pid = Some(pid);
                        vuos_mem = Some(process.memory() / 1024 / 1024);
                    }
                } else if name == server_name.as_str() {
                    server_seen = true;
                }
            }

            let now_ms = vuwatch_shared::now_ms();
            let today = Local::now().date_naive();
            let mut c = cache.write().await;
            c.server_running = server_seen;
            if c.observe_process(vuos_pid, vuos_mem, today, now_ms) {
                info!(
                    "Target app PID changed ({:?} -> {:?}), crash #{} today",
                    c.crash_detected.as_ref().map(|i| i.old_pid),
                    vuos_pid,
                    c.crash_count_today
                );
            }
        }
    })
}

fn spawn_lock_loop(cache: Arc<RwLock<AppCache>>, lock_path: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LOCK_INTERVAL);
        loop {
            interval.tick().await;
            let lock = match tokio::fs::read_to_string(&lock_path).await {
                Ok(content) => parse_lock_file(&content, vuwatch_shared::now_ms()),
                Err(e) => {
                    debug!("lock file read failed: {}", e);
                    None
                }
            };
            cache.write().await.lock = lock;
        }
    })
}

fn spawn_error_log_loop(cache: Arc<RwLock<AppCache>>, log_path: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ERROR_LOG_INTERVAL);
        loop {
            interval.tick().await;
            match tokio::fs::read_to_string(&log_path).await {
                Ok(content) => {
                    let summary = summarize_error_log(&content, vuwatch_shared::now_ms());
                    cache.write().await.log = summary;
                }
                Err(e) => {
                    debug!("app log read failed: {}", e);
                }
            }
        }
    })
}

/// On-disk lock file shape written by the supporting server.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLockFile {
    pid: u32,
    start_time: i64,
    last_heartbeat: i64,
}

/// Parse the lock file and derive heartbeat health.
fn parse_lock_file(content: &str, now_ms: i64) -> Option<LockFileStatus> {
    let raw: RawLockFile = serde_json::from_str(content).ok()?;
    let heartbeat_age_ms = (now_ms - raw.last_heartbeat).max(0);
    Some(LockFileStatus {
        pid: raw.pid,
        start_time: raw.start_time,
        last_heartbeat: raw.last_heartbeat,
        heartbeat_age_ms,
        healthy: heartbeat_age_ms <= LOCK_STALE_MS,
    })
}

/// Summarize the tail of the application error log.
///
/// Lines carrying a leading RFC 3339 timestamp are counted when they fall
/// inside the recent window; untimestamped error lines in the tail count
/// unconditionally.
fn summarize_error_log(content: &str, now_ms: i64) -> LogSummary {
    const TAIL: usize = 200;
    let lines: Vec<&str> = content.lines().collect();
    let tail = &lines[lines.len().saturating_sub(TAIL)..];

    let mut recent = 0u32;
    let mut last_message: Option<String> = None;
    let mut last_time: Option<i64> = None;

    for line in tail {
        let lower = line.to_lowercase();
        if !(lower.contains("error") || lower.contains("fatal")) {
            continue;
        }
        match parse_line_timestamp(line) {
            Some(ts) => {
                if now_ms - ts <= ERROR_WINDOW_MS {
                    recent += 1;
                    last_message = Some(line.to_string());
                    last_time = Some(ts);
                }
            }
            None => {
                recent += 1;
                last_message = Some(line.to_string());
            }
        }
    }

    LogSummary { recent_count: recent, last_message, last_time }
}

/// Try to read an RFC 3339 timestamp from the start of a log line.
fn parse_line_timestamp(line: &str) -> Option<i64> {
    let candidate = line.split_whitespace().next()?;
    chrono::DateTime::parse_from_rfc3339(candidate)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_pid_change_counts_as_crash() {
        let mut cache = AppCache::new();
        let today = day("2026-08-01");
        assert!(!cache.observe_process(Some(1000), Some(512), today, 0));
        assert!(!cache.observe_process(Some(1000), Some(512), today, 2_000));
        assert!(cache.observe_process(Some(1002), Some(256), today, 5_000));
        assert_eq!(cache.crash_count_today, 1);
        let crash = cache.take_crash().unwrap();
        assert_eq!((crash.old_pid, crash.new_pid), (1000, 1002));
        assert!(cache.take_crash().is_none());
    }

    #[test]
    fn test_disappearance_alone_is_not_a_crash() {
        let mut cache = AppCache::new();
        let today = day("2026-08-01");
        cache.observe_process(Some(1000), Some(512), today, 0);
        assert!(!cache.observe_process(None, None, today, 2_000));
        assert_eq!(cache.crash_count_today, 0);
        assert!(!cache.vuos_running);
        // Reappearance under a new PID is the crash.
        assert!(cache.observe_process(Some(1003), Some(400), today, 4_000));
        assert_eq!(cache.crash_count_today, 1);
    }

    #[test]
    fn test_crash_count_resets_on_date_rollover() {
        let mut cache = AppCache::new();
        cache.observe_process(Some(1000), None, day("2026-08-01"), 0);
        cache.observe_process(Some(1001), None, day("2026-08-01"), 1_000);
        assert_eq!(cache.crash_count_today, 1);
        // Next day: counter resets, and the same observation is not a crash.
        assert!(!cache.observe_process(Some(1001), None, day("2026-08-02"), 90_000_000));
        assert_eq!(cache.crash_count_today, 0);
    }

    #[test]
    fn test_parse_lock_file_healthy() {
        let content = r#"{"pid": 4321, "startTime": 1000, "lastHeartbeat": 9000}"#;
        let lock = parse_lock_file(content, 10_000).unwrap();
        assert_eq!(lock.pid, 4321);
        assert_eq!(lock.heartbeat_age_ms, 1_000);
        assert!(lock.healthy);
    }

    #[test]
    fn test_parse_lock_file_stale() {
        let content = r#"{"pid": 4321, "startTime": 1000, "lastHeartbeat": 1000}"#;
        let lock = parse_lock_file(content, 20_000).unwrap();
        assert_eq!(lock.heartbeat_age_ms, 19_000);
        assert!(!lock.healthy);
    }

    #[test]
    fn test_parse_lock_file_garbage() {
        assert!(parse_lock_file("not json", 0).is_none());
    }

    #[test]
    fn test_summarize_error_log_window() {
        let now = 1_700_000_600_000;
        // One error inside the 10 min window, one outside, one info line.
        let content = "\
2023-11-14T22:13:00+00:00 ERROR old failure
2023-11-14T22:22:30+00:00 INFO all good
2023-11-14T22:23:00+00:00 ERROR recent failure";
        let summary = summarize_error_log(content, now);
        assert_eq!(summary.recent_count, 1);
        assert!(summary.last_message.unwrap().contains("recent failure"));
        assert!(summary.last_time.is_some());
    }

    #[test]
    fn test_summarize_error_log_untimestamped() {
        let content = "ERROR something broke\ninfo fine\nFATAL worse";
        let summary = summarize_error_log(content, 0);
        assert_eq!(summary.recent_count, 2);
        assert!(summary.last_message.unwrap().contains("worse"));
    }
}
