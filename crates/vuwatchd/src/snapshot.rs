//! Snapshot assembler: composes a telemetry record from the collector
//! caches on each publish tick. No I/O happens on this path.

use vuwatch_shared::telemetry::TelemetryRecord;

use crate::collectors::CollectorSet;

pub struct Assembler {
    wall_id: String,
    collectors: CollectorSet,
}

impl Assembler {
    pub fn new(wall_id: &str, collectors: CollectorSet) -> Self {
        Self { wall_id: wall_id.to_string(), collectors }
    }

    /// Read every cache and compose the record. Lock hold times are just
    /// clone-out reads; collectors are never blocked on probe work here.
    pub async fn assemble(&self) -> TelemetryRecord {
        let mut system = self.collectors.system.read().await.to_telemetry();
        system.gpu = self.collectors.gpu.read().await.gpu.clone();

        let network_cache = self.collectors.network.read().await;
        let network = network_cache.to_telemetry();
        let server_version = network_cache.server_version.clone();
        drop(network_cache);

        let app = self.collectors.app.read().await.to_telemetry(server_version);

        TelemetryRecord {
            timestamp: vuwatch_shared::now_ms(),
            wall_id: self.wall_id.clone(),
            system,
            network,
            app,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vuwatch_shared::telemetry::GpuTelemetry;

    #[tokio::test]
    async fn test_assemble_composes_caches() {
        let collectors = CollectorSet::new();
        {
            let mut system = collectors.system.write().await;
            system.cpu_percent = 42.0;
            system.disk_percent = 91.5;
        }
        {
            collectors.gpu.write().await.gpu = Some(GpuTelemetry {
                name: "Test GPU".to_string(),
                usage_percent: Some(10.0),
                vram_used_mb: None,
                vram_total_mb: None,
                temperature_c: None,
            });
        }
        {
            let mut network = collectors.network.write().await;
            network.internet = true;
            network.latency_ms = Some(12);
            network.server_version = Some("3.1.0".to_string());
        }

        let assembler = Assembler::new("wall-9", collectors);
        let record = assembler.assemble().await;
        assert_eq!(record.wall_id, "wall-9");
        assert_eq!(record.system.cpu_percent, 42.0);
        assert_eq!(record.system.gpu.as_ref().unwrap().name, "Test GPU");
        assert_eq!(record.network.latency_ms, Some(12));
        assert_eq!(record.app.server_version.as_deref(), Some("3.1.0"));
        assert!(record.timestamp > 0);
    }
}
