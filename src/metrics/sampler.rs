//! Snapshot assembly.
//!
//! The [`Sampler`] reads every enabled category from a [`MetricsProvider`],
//! converts cumulative disk and network counters into rates and stamps the
//! result with wall-clock milliseconds. A failing category is logged, replaced
//! by its zero-valued default and listed in [`MetricsSnapshot::degraded`].

use crate::config::MetricsConfig;
use crate::error::{AgentError, Result};
use crate::metrics::data::*;
use crate::metrics::rate::{CounterSample, RateTracker};
use crate::metrics::traits::MetricsProvider;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Disk counter families tracked for rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskCounter {
    ReadBytes,
    WriteBytes,
    ReadCount,
    WriteCount,
}

/// Traffic direction of a network counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

type InterfaceKey = (String, Direction);

/// Builds [`MetricsSnapshot`]s from a provider.
pub struct Sampler<P> {
    provider: P,
    toggles: MetricsConfig,
    disk_rates: RateTracker<DiskCounter>,
    network_rates: RateTracker<InterfaceKey>,
}

impl<P: MetricsProvider> Sampler<P> {
    pub fn new(provider: P, toggles: MetricsConfig) -> Self {
        Self {
            provider,
            toggles,
            disk_rates: RateTracker::new(),
            network_rates: RateTracker::new(),
        }
    }

    pub fn toggles(&self) -> MetricsConfig {
        self.toggles
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Host identity, read once at startup.
    pub fn static_system_info(&mut self) -> Result<StaticSystemInfo> {
        self.provider.static_system_info()
    }

    /// Collect one snapshot.
    ///
    /// Individual category failures never fail the call. The only error is a
    /// provider that cannot produce a timestamp.
    pub fn collect_all(&mut self) -> Result<MetricsSnapshot> {
        let timestamp = self.provider.timestamp()?;
        self.provider.refresh();

        let mut snapshot = MetricsSnapshot::at(timestamp);
        let mut degraded = Vec::new();

        if self.toggles.cpu {
            snapshot.cpu = settle(MetricCategory::Cpu, self.provider.cpu(), &mut degraded);
        }
        if self.toggles.memory {
            snapshot.memory = settle(MetricCategory::Memory, self.provider.memory(), &mut degraded);
        }
        if self.toggles.disk {
            snapshot.disk = self.collect_disk(&mut degraded);
        }
        if self.toggles.network {
            snapshot.network = self.collect_network(&mut degraded);
        }
        if self.toggles.gpu {
            snapshot.gpu = settle(MetricCategory::Gpu, self.provider.gpu(), &mut degraded);
        }
        if self.toggles.temperatures {
            snapshot.temperatures = settle(
                MetricCategory::Temperatures,
                self.provider.temperatures(),
                &mut degraded,
            );
        }
        if self.toggles.processes {
            snapshot.processes = settle(
                MetricCategory::Processes,
                self.provider.processes(),
                &mut degraded,
            );
        }

        degraded.dedup();
        snapshot.degraded = degraded;
        Ok(snapshot)
    }

    fn collect_disk(&mut self, degraded: &mut Vec<MetricCategory>) -> DiskMetrics {
        let drives = settle(MetricCategory::Disk, self.provider.disk_partitions(), degraded);

        let io = match self.provider.disk_counters() {
            Ok(counters) => self.disk_rates(counters),
            Err(e) => {
                report(MetricCategory::Disk, &e, degraded);
                None
            }
        };

        DiskMetrics { drives, io }
    }

    fn disk_rates(&mut self, counters: DiskCounters) -> Option<DiskIoRates> {
        let sample: CounterSample<DiskCounter> = [
            (DiskCounter::ReadBytes, counters.read_bytes),
            (DiskCounter::WriteBytes, counters.write_bytes),
            (DiskCounter::ReadCount, counters.read_count),
            (DiskCounter::WriteCount, counters.write_count),
        ]
        .into_iter()
        .collect();

        let Some(rates) = self.disk_rates.update(sample) else {
            debug!("Disk I/O baseline recorded");
            return None;
        };
        let per_sec = |counter| rates.get(&counter).map_or(0.0, |r| r.rate_per_sec);

        Some(DiskIoRates {
            read_bytes: counters.read_bytes,
            write_bytes: counters.write_bytes,
            read_count: counters.read_count,
            write_count: counters.write_count,
            read_bytes_sec: per_sec(DiskCounter::ReadBytes),
            write_bytes_sec: per_sec(DiskCounter::WriteBytes),
            read_count_sec: per_sec(DiskCounter::ReadCount),
            write_count_sec: per_sec(DiskCounter::WriteCount),
        })
    }

    fn collect_network(&mut self, degraded: &mut Vec<MetricCategory>) -> NetworkMetrics {
        let interfaces = settle(
            MetricCategory::Network,
            self.provider.network_interfaces(),
            degraded,
        );

        let mut metrics = NetworkMetrics {
            interfaces,
            ..Default::default()
        };

        match self.provider.network_counters() {
            Ok(counters) => self.network_rates(counters, &mut metrics),
            Err(e) => report(MetricCategory::Network, &e, degraded),
        }

        metrics
    }

    fn network_rates(&mut self, counters: Vec<InterfaceCounters>, metrics: &mut NetworkMetrics) {
        let sample: CounterSample<InterfaceKey> = counters
            .iter()
            .flat_map(|c| {
                [
                    ((c.name.clone(), Direction::Rx), c.rx_bytes),
                    ((c.name.clone(), Direction::Tx), c.tx_bytes),
                ]
            })
            .collect();

        let Some(rates) = self.network_rates.update(sample) else {
            debug!("Network baseline recorded");
            return;
        };

        let stats: Vec<InterfaceRate> = counters
            .into_iter()
            .map(|c| {
                let rx_sec = rates
                    .get(&(c.name.clone(), Direction::Rx))
                    .map(|r| r.rate_per_sec);
                let tx_sec = rates
                    .get(&(c.name.clone(), Direction::Tx))
                    .map(|r| r.rate_per_sec);
                InterfaceRate {
                    iface: c.name,
                    rx_bytes: c.rx_bytes,
                    tx_bytes: c.tx_bytes,
                    rx_packets: c.rx_packets,
                    tx_packets: c.tx_packets,
                    rx_sec,
                    tx_sec,
                }
            })
            .collect();

        metrics.total_rx = Some(stats.iter().filter_map(|s| s.rx_sec).sum());
        metrics.total_tx = Some(stats.iter().filter_map(|s| s.tx_sec).sum());
        metrics.stats = Some(stats);
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> Result<u64> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AgentError::clock_error(format!("System clock before Unix epoch: {}", e)))?;
    Ok(since_epoch.as_millis() as u64)
}

fn settle<T: Default>(
    category: MetricCategory,
    outcome: Result<T>,
    degraded: &mut Vec<MetricCategory>,
) -> T {
    outcome.unwrap_or_else(|e| {
        report(category, &e, degraded);
        T::default()
    })
}

fn report(category: MetricCategory, error: &AgentError, degraded: &mut Vec<MetricCategory>) {
    warn!(category = %category, error = %error, "Metric collection failed, using defaults");
    if !degraded.contains(&category) {
        degraded.push(category);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Provider with scripted counters and switchable failures.
    #[derive(Default)]
    struct FakeProvider {
        calls: u32,
        disk: DiskCounters,
        interfaces: Vec<InterfaceCounters>,
        fail_memory: bool,
        fail_disk_counters: bool,
        fail_clock: bool,
    }

    impl MetricsProvider for FakeProvider {
        fn refresh(&mut self) {
            self.calls += 1;
        }

        fn timestamp(&mut self) -> Result<u64> {
            if self.fail_clock {
                return Err(AgentError::clock_error("clock went backwards"));
            }
            unix_millis()
        }

        fn cpu(&mut self) -> Result<CpuMetrics> {
            Ok(CpuMetrics {
                usage: self.calls as f32,
                cores: 4,
                ..Default::default()
            })
        }

        fn memory(&mut self) -> Result<MemoryMetrics> {
            if self.fail_memory {
                return Err(AgentError::collection_error(MetricCategory::Memory, "meminfo unreadable"));
            }
            Ok(MemoryMetrics {
                total: 1024,
                used: 512,
                percentage: 50.0,
                ..Default::default()
            })
        }

        fn disk_partitions(&mut self) -> Result<Vec<DrivePartition>> {
            Ok(vec![DrivePartition {
                mountpoint: "/".to_string(),
                ..Default::default()
            }])
        }

        fn disk_counters(&mut self) -> Result<DiskCounters> {
            if self.fail_disk_counters {
                return Err(AgentError::collection_error(MetricCategory::Disk, "no diskstats"));
            }
            Ok(self.disk)
        }

        fn network_interfaces(&mut self) -> Result<Vec<NetworkInterface>> {
            Ok(self
                .interfaces
                .iter()
                .map(|c| NetworkInterface {
                    name: c.name.clone(),
                    mac: None,
                    is_up: true,
                })
                .collect())
        }

        fn network_counters(&mut self) -> Result<Vec<InterfaceCounters>> {
            Ok(self.interfaces.clone())
        }

        fn gpu(&mut self) -> Result<GpuMetrics> {
            Err(AgentError::collection_error(MetricCategory::Gpu, "no driver"))
        }

        fn temperatures(&mut self) -> Result<TemperatureMetrics> {
            Ok(TemperatureMetrics::default())
        }

        fn processes(&mut self) -> Result<ProcessMetrics> {
            Ok(ProcessMetrics {
                total: 42,
                ..Default::default()
            })
        }

        fn static_system_info(&mut self) -> Result<StaticSystemInfo> {
            Ok(StaticSystemInfo {
                hostname: "fake".to_string(),
                ..Default::default()
            })
        }
    }

    fn iface(name: &str, rx: u64, tx: u64) -> InterfaceCounters {
        InterfaceCounters {
            name: name.to_string(),
            rx_bytes: rx,
            tx_bytes: tx,
            ..Default::default()
        }
    }

    fn no_gpu() -> MetricsConfig {
        MetricsConfig {
            gpu: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_snapshot_has_no_rates() {
        let provider = FakeProvider {
            interfaces: vec![iface("eth0", 1000, 500)],
            ..Default::default()
        };
        let mut sampler = Sampler::new(provider, no_gpu());

        let snapshot = sampler.collect_all().unwrap();
        assert!(snapshot.timestamp > 0);
        assert_eq!(snapshot.cpu.cores, 4);
        assert!(snapshot.disk.io.is_none());
        assert!(snapshot.network.stats.is_none());
        assert!(snapshot.network.total_rx.is_none());
        assert!(snapshot.degraded.is_empty());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["disk"].get("io").is_none());
        assert!(json["network"].get("totalRx").is_none());
    }

    #[test]
    fn test_second_snapshot_reports_rates() {
        let provider = FakeProvider {
            interfaces: vec![iface("eth0", 1000, 500)],
            ..Default::default()
        };
        let mut sampler = Sampler::new(provider, no_gpu());
        sampler.collect_all().unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let provider = sampler.provider_mut();
        provider.disk.read_bytes = 4096;
        provider.interfaces = vec![iface("eth0", 2000, 500), iface("wlan0", 10, 10)];

        let snapshot = sampler.collect_all().unwrap();
        let io = snapshot.disk.io.expect("disk rates after baseline");
        assert_eq!(io.read_bytes, 4096);
        assert!(io.read_bytes_sec > 0.0);
        assert_eq!(io.write_bytes_sec, 0.0);

        let stats = snapshot.network.stats.expect("interface rates after baseline");
        let eth0 = stats.iter().find(|s| s.iface == "eth0").unwrap();
        assert!(eth0.rx_sec.unwrap() > 0.0);
        assert_eq!(eth0.tx_sec, Some(0.0));

        // Hot-plugged interface has counters but no rate yet.
        let wlan0 = stats.iter().find(|s| s.iface == "wlan0").unwrap();
        assert!(wlan0.rx_sec.is_none());
        assert_eq!(snapshot.network.total_rx, eth0.rx_sec);
    }

    #[test]
    fn test_failing_category_degrades_to_default() {
        let provider = FakeProvider {
            fail_memory: true,
            ..Default::default()
        };
        let mut sampler = Sampler::new(provider, MetricsConfig::default());

        let snapshot = sampler.collect_all().unwrap();
        assert_eq!(snapshot.memory, MemoryMetrics::default());
        assert_eq!(snapshot.gpu, GpuMetrics::default());
        assert!(snapshot.is_degraded(MetricCategory::Memory));
        assert!(snapshot.is_degraded(MetricCategory::Gpu));
        assert!(!snapshot.is_degraded(MetricCategory::Cpu));
        assert_eq!(snapshot.processes.total, 42);
    }

    #[test]
    fn test_counter_failure_keeps_partitions() {
        let provider = FakeProvider {
            fail_disk_counters: true,
            ..Default::default()
        };
        let mut sampler = Sampler::new(provider, no_gpu());

        let snapshot = sampler.collect_all().unwrap();
        assert_eq!(snapshot.disk.drives.len(), 1);
        assert!(snapshot.disk.io.is_none());
        assert_eq!(snapshot.degraded, vec![MetricCategory::Disk]);
    }

    #[test]
    fn test_disabled_categories_are_skipped() {
        let toggles = MetricsConfig {
            processes: false,
            gpu: false,
            memory: false,
            ..Default::default()
        };
        let provider = FakeProvider {
            fail_memory: true,
            ..Default::default()
        };
        let mut sampler = Sampler::new(provider, toggles);

        let snapshot = sampler.collect_all().unwrap();
        assert_eq!(snapshot.processes.total, 0);
        assert!(snapshot.degraded.is_empty());
    }

    #[test]
    fn test_clock_failure_fails_the_whole_tick() {
        let mut sampler = Sampler::new(
            FakeProvider {
                fail_clock: true,
                interfaces: vec![iface("eth0", 1000, 0)],
                ..Default::default()
            },
            no_gpu(),
        );

        let result = sampler.collect_all();
        assert!(matches!(result, Err(AgentError::Clock(_))));
        assert_eq!(sampler.provider_mut().calls, 0, "no category is read without a timestamp");

        // The failed tick leaves no rate baseline behind.
        sampler.provider_mut().fail_clock = false;
        let snapshot = sampler.collect_all().unwrap();
        assert!(snapshot.network.stats.is_none());
    }

    #[test]
    fn test_static_info_passthrough() {
        let mut sampler = Sampler::new(FakeProvider::default(), no_gpu());
        assert_eq!(sampler.static_system_info().unwrap().hostname, "fake");
    }
}
