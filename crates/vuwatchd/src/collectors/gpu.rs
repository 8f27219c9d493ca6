//! GPU collector with a first-success-wins probe strategy.
//!
//! The native vendor probe (`nvidia-smi`) is tried first, then an OS-level
//! fallback that only yields the adapter name. Once a strategy succeeds,
//! subsequent polls use it exclusively.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use vuwatch_shared::telemetry::GpuTelemetry;

use super::GPU_INTERVAL;

/// Which probe path has won, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Strategy {
    #[default]
    Undecided,
    NvidiaSmi,
    Lspci,
}

#[derive(Debug, Default)]
pub struct GpuCache {
    pub gpu: Option<GpuTelemetry>,
    pub consecutive_failures: u32,
    strategy: Strategy,
}

pub fn spawn(cache: Arc<RwLock<GpuCache>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GPU_INTERVAL);
        loop {
            interval.tick().await;
            let strategy = cache.read().await.strategy;

            let (result, used) = match strategy {
                Strategy::NvidiaSmi => (probe_nvidia_smi().await, Strategy::NvidiaSmi),
                Strategy::Lspci => (probe_lspci().await, Strategy::Lspci),
                Strategy::Undecided => match probe_nvidia_smi().await {
                    Some(gpu) => (Some(gpu), Strategy::NvidiaSmi),
                    None => (probe_lspci().await, Strategy::Lspci),
                },
            };

            let mut c = cache.write().await;
            match result {
                Some(gpu) => {
                    if c.strategy == Strategy::Undecided {
                        debug!("GPU probe strategy locked: {:?}", used);
                        c.strategy = used;
                    }
                    c.gpu = Some(gpu);
                    c.consecutive_failures = 0;
                }
                None => {
                    c.consecutive_failures += 1;
                    // Sustained failure clears the value so the health
                    // condition can observe the outage.
                    if c.consecutive_failures >= 3 {
                        c.gpu = None;
                    }
                }
            }
        }
    })
}

async fn probe_nvidia_smi() -> Option<GpuTelemetry> {
    let output = tokio::process::Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,utilization.gpu,memory.used,memory.total,temperature.gpu",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse one CSV line of `nvidia-smi --query-gpu` output.
fn parse_nvidia_smi(output: &str) -> Option<GpuTelemetry> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 5 || fields[0].is_empty() {
        return None;
    }
    Some(GpuTelemetry {
        name: fields[0].to_string(),
        usage_percent: fields[1].parse().ok(),
        vram_used_mb: fields[2].parse().ok(),
        vram_total_mb: fields[3].parse().ok(),
        temperature_c: fields[4].parse().ok(),
    })
}

async fn probe_lspci() -> Option<GpuTelemetry> {
    let output = tokio::process::Command::new("lspci").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    parse_lspci(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the display adapter name from `lspci` output. Usage and VRAM are
/// unavailable on this path.
fn parse_lspci(output: &str) -> Option<GpuTelemetry> {
    let line = output
        .lines()
        .find(|l| l.contains("VGA compatible controller") || l.contains("3D controller"))?;
    let name = line.splitn(3, ':').nth(2)?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(GpuTelemetry {
        name,
        usage_percent: None,
        vram_used_mb: None,
        vram_total_mb: None,
        temperature_c: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi() {
        let output = "NVIDIA RTX A2000, 27, 1165, 6144, 51\n";
        let gpu = parse_nvidia_smi(output).unwrap();
        assert_eq!(gpu.name, "NVIDIA RTX A2000");
        assert_eq!(gpu.usage_percent, Some(27.0));
        assert_eq!(gpu.vram_used_mb, Some(1_165));
        assert_eq!(gpu.vram_total_mb, Some(6_144));
        assert_eq!(gpu.temperature_c, Some(51.0));
    }

    #[test]
    fn test_parse_nvidia_smi_garbage() {
        assert!(parse_nvidia_smi("").is_none());
        assert!(parse_nvidia_smi("not,enough\n").is_none());
    }

    #[test]
    fn test_parse_lspci() {
        let output = "\
00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 630 (rev 02)
00:1f.3 Audio device: Intel Corporation Cannon Lake PCH cAVS";
        let gpu = parse_lspci(output).unwrap();
        assert!(gpu.name.contains("UHD Graphics 630"));
        assert!(gpu.usage_percent.is_none());
    }

    #[test]
    fn test_parse_lspci_no_gpu() {
        assert!(parse_lspci("00:1f.3 Audio device: something").is_none());
    }
}
