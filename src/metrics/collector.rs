//! Host metrics provider backed by sysinfo and direct /proc access.

use crate::error::{AgentError, Result};
use crate::metrics::{
    data::*,
    gpu::{DefaultGpuProvider, GpuProvider},
    traits::MetricsProvider,
};
use std::collections::BTreeMap;
use std::fs;
use sysinfo::{Components, Disks, Networks, ProcessStatus, System, Users};

/// Number of processes reported in each top-N list.
const TOP_PROCESSES: usize = 10;
const SECTOR_SIZE: u64 = 512;

/// System metrics collector using sysinfo and direct /proc access.
pub struct SystemCollector {
    system: System,
    disks: Disks,
    networks: Networks,
    components: Components,
    users: Users,
    gpu: Option<DefaultGpuProvider>,
}

impl SystemCollector {
    /// Create a new collector with GPU monitoring enabled when available.
    pub fn new() -> Result<Self> {
        Self::with_gpu(true)
    }

    /// Create a new collector, optionally skipping GPU initialization.
    pub fn with_gpu(enable_gpu: bool) -> Result<Self> {
        let mut system = System::new_all();
        system.refresh_all();

        let gpu = if enable_gpu {
            match DefaultGpuProvider::new() {
                Ok(provider) if provider.is_available() => {
                    tracing::info!("GPU monitoring enabled");
                    Some(provider)
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "GPU monitoring not available, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            users: Users::new_with_refreshed_list(),
            gpu,
        })
    }

    pub fn gpu_available(&self) -> bool {
        self.gpu.is_some()
    }

    /// Read the page cache and buffer sizes from /proc/meminfo.
    fn read_memory_breakdown(&self) -> Option<(u64, u64)> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let mut buffers = 0;
        let mut cached = 0;

        for line in meminfo.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let kb = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<u64>().ok());
                match (key, kb) {
                    ("Buffers", Some(kb)) => buffers = kb.saturating_mul(1024),
                    ("Cached", Some(kb)) => cached = kb.saturating_mul(1024),
                    _ => {}
                }
            }
        }

        Some((buffers, cached))
    }
}

impl MetricsProvider for SystemCollector {
    fn refresh(&mut self) {
        self.system.refresh_all();
        self.disks.refresh();
        self.networks.refresh();
        self.components.refresh();
    }

    fn cpu(&mut self) -> Result<CpuMetrics> {
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(AgentError::collection_error(
                MetricCategory::Cpu,
                "No CPU information available",
            ));
        }

        let core_usage: Vec<f32> = cpus.iter().map(|cpu| cpu.cpu_usage()).collect();
        let usage = core_usage.iter().sum::<f32>() / core_usage.len() as f32;
        let load = System::load_average();

        Ok(CpuMetrics {
            usage,
            load_average: [load.one, load.five, load.fifteen],
            cores: cpus.len() as u32,
            model: cpus[0].brand().to_string(),
            manufacturer: std::env::consts::ARCH.to_string(),
            speed: cpus[0].frequency(),
            core_usage,
        })
    }

    fn memory(&mut self) -> Result<MemoryMetrics> {
        let total = self.system.total_memory();
        if total == 0 {
            return Err(AgentError::collection_error(
                MetricCategory::Memory,
                "Total memory reported as zero",
            ));
        }
        let used = self.system.used_memory();
        let (buffers, cached) = self.read_memory_breakdown().unwrap_or_default();

        Ok(MemoryMetrics {
            total,
            used,
            free: self.system.available_memory(),
            cached,
            buffers,
            swap_total: self.system.total_swap(),
            swap_used: self.system.used_swap(),
            swap_free: self.system.free_swap(),
            percentage: percent(used, total) as f32,
        })
    }

    fn disk_partitions(&mut self) -> Result<Vec<DrivePartition>> {
        Ok(self
            .disks
            .iter()
            .filter(|disk| disk.file_system().to_string_lossy() != "squashfs")
            .map(|disk| {
                let total = disk.total_space();
                let free = disk.available_space();
                let used = total.saturating_sub(free);

                DrivePartition {
                    device: disk.name().to_string_lossy().to_string(),
                    mountpoint: disk.mount_point().to_string_lossy().to_string(),
                    fstype: disk.file_system().to_string_lossy().to_string(),
                    total,
                    used,
                    free,
                    use_percent: percent(used, total) as f32,
                }
            })
            .collect())
    }

    #[cfg(target_os = "linux")]
    fn disk_counters(&mut self) -> Result<DiskCounters> {
        let diskstats = fs::read_to_string("/proc/diskstats").map_err(|e| {
            AgentError::collection_error(MetricCategory::Disk, format!("/proc/diskstats: {}", e))
        })?;

        Ok(parse_diskstats(&diskstats, |name| {
            std::path::Path::new("/sys/block").join(name).exists()
        }))
    }

    #[cfg(not(target_os = "linux"))]
    fn disk_counters(&mut self) -> Result<DiskCounters> {
        Err(AgentError::collection_error(
            MetricCategory::Disk,
            "Disk I/O counters are not supported on this platform",
        ))
    }

    fn network_interfaces(&mut self) -> Result<Vec<NetworkInterface>> {
        Ok(self
            .networks
            .iter()
            .map(|(name, data)| {
                let mac = data.mac_address().to_string();
                NetworkInterface {
                    name: name.clone(),
                    mac: (mac != "00:00:00:00:00:00").then_some(mac),
                    is_up: data.total_received() > 0 || data.total_transmitted() > 0,
                }
            })
            .collect())
    }

    fn network_counters(&mut self) -> Result<Vec<InterfaceCounters>> {
        Ok(self
            .networks
            .iter()
            .map(|(name, data)| InterfaceCounters {
                name: name.clone(),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
                rx_packets: data.total_packets_received(),
                tx_packets: data.total_packets_transmitted(),
            })
            .collect())
    }

    fn gpu(&mut self) -> Result<GpuMetrics> {
        match self.gpu.as_mut() {
            Some(provider) => provider.read_gpu_status(),
            None => Ok(GpuMetrics::default()),
        }
    }

    fn temperatures(&mut self) -> Result<TemperatureMetrics> {
        Ok(summarize_temperatures(
            self.components
                .iter()
                .map(|c| (c.label().to_string(), c.temperature())),
        ))
    }

    fn processes(&mut self) -> Result<ProcessMetrics> {
        let total_memory = self.system.total_memory();
        let mut summary = ProcessMetrics::default();
        let mut entries = Vec::with_capacity(self.system.processes().len());

        for (pid, process) in self.system.processes() {
            match process.status() {
                ProcessStatus::Run => summary.running += 1,
                ProcessStatus::Sleep | ProcessStatus::Idle => summary.sleeping += 1,
                ProcessStatus::Stop => summary.stopped += 1,
                ProcessStatus::Zombie => summary.zombie += 1,
                _ => {}
            }

            let user = process
                .user_id()
                .and_then(|uid| self.users.get_user_by_id(uid))
                .map(|user| user.name().to_string());

            entries.push(ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                cpu: process.cpu_usage(),
                memory: percent(process.memory(), total_memory) as f32,
                user,
                status: process.status().to_string().to_lowercase(),
            });
        }

        summary.total = entries.len() as u64;
        summary.top_by_cpu = top_by(&entries, |p| p.cpu);
        summary.top_by_memory = top_by(&entries, |p| p.memory);
        Ok(summary)
    }

    fn static_system_info(&mut self) -> Result<StaticSystemInfo> {
        let cpus = self.system.cpus();
        let unknown = || "unknown".to_string();

        Ok(StaticSystemInfo {
            hostname: System::host_name().unwrap_or_else(unknown),
            platform: System::name().unwrap_or_else(unknown),
            platform_release: System::os_version().unwrap_or_else(unknown),
            platform_version: System::kernel_version().unwrap_or_else(unknown),
            architecture: std::env::consts::ARCH.to_string(),
            processor: cpus
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(unknown),
            cpu: StaticCpuInfo {
                cores: cpus.len() as u32,
                frequency: cpus.first().map(|cpu| cpu.frequency()).unwrap_or(0),
            },
            memory: StaticMemoryInfo {
                total: self.system.total_memory(),
                total_swap: self.system.total_swap(),
            },
            uptime: System::uptime(),
        })
    }
}

/// Sum whole-disk counters from the contents of /proc/diskstats.
///
/// Partitions are skipped so that their I/O is not counted twice, as are loop
/// and ram devices. Sector counts are converted at 512 bytes per sector.
pub fn parse_diskstats(contents: &str, is_whole_disk: impl Fn(&str) -> bool) -> DiskCounters {
    let mut counters = DiskCounters::default();

    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") || !is_whole_disk(name) {
            continue;
        }

        let field = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
        counters.read_count = counters.read_count.saturating_add(field(3));
        counters.read_bytes = counters
            .read_bytes
            .saturating_add(field(5).saturating_mul(SECTOR_SIZE));
        counters.write_count = counters.write_count.saturating_add(field(7));
        counters.write_bytes = counters
            .write_bytes
            .saturating_add(field(9).saturating_mul(SECTOR_SIZE));
    }

    counters
}

/// Group sensor readings by chip name (the first word of the label).
pub fn summarize_temperatures(readings: impl Iterator<Item = (String, f32)>) -> TemperatureMetrics {
    let mut grouped: BTreeMap<String, Vec<f32>> = BTreeMap::new();
    for (label, celsius) in readings {
        if !celsius.is_finite() || celsius <= 0.0 {
            continue;
        }
        let chip = label
            .split_whitespace()
            .next()
            .unwrap_or("unknown")
            .to_string();
        grouped.entry(chip).or_default().push(celsius);
    }

    let mut metrics = TemperatureMetrics::default();
    for (chip, cores) in grouped {
        let current = cores.iter().sum::<f32>() / cores.len() as f32;
        let max = cores.iter().copied().fold(f32::MIN, f32::max);

        metrics.max = metrics.max.max(max);
        let lower = chip.to_lowercase();
        if ["core", "cpu", "k10temp", "package", "tctl"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            metrics.cpu = metrics.cpu.max(max);
        }
        metrics
            .sensors
            .insert(chip, SensorReading { current, max, cores });
    }

    metrics
}

fn top_by(entries: &[ProcessEntry], key: impl Fn(&ProcessEntry) -> f32) -> Vec<ProcessEntry> {
    let mut sorted: Vec<&ProcessEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| key(b).total_cmp(&key(a)));
    sorted.into_iter().take(TOP_PROCESSES).cloned().collect()
}
