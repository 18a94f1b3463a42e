//! Data structures for system metrics.
//!
//! Field names serialize in camelCase because that is the shape the collector
//! expects on the wire. Internal code only ever touches the typed fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One independently collected metric category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    Cpu,
    Memory,
    Disk,
    Network,
    Gpu,
    Temperatures,
    Processes,
}

impl MetricCategory {
    /// Every category, in snapshot order.
    pub const ALL: [MetricCategory; 7] = [
        MetricCategory::Cpu,
        MetricCategory::Memory,
        MetricCategory::Disk,
        MetricCategory::Network,
        MetricCategory::Gpu,
        MetricCategory::Temperatures,
        MetricCategory::Processes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
            Self::Gpu => "gpu",
            Self::Temperatures => "temperatures",
            Self::Processes => "processes",
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete snapshot of host metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Timestamp when this snapshot was taken (Unix timestamp in milliseconds)
    pub timestamp: u64,
    /// CPU information and usage statistics
    pub cpu: CpuMetrics,
    /// Memory usage information
    pub memory: MemoryMetrics,
    /// Partitions and disk I/O rates
    pub disk: DiskMetrics,
    /// Interfaces and network I/O rates
    pub network: NetworkMetrics,
    /// GPU controllers
    pub gpu: GpuMetrics,
    /// Temperature sensors
    pub temperatures: TemperatureMetrics,
    /// Process table summary
    pub processes: ProcessMetrics,
    /// Static host identity, attached once per agent run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<StaticSystemInfo>,
    /// Categories that failed this tick and carry default values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<MetricCategory>,
}

impl MetricsSnapshot {
    /// Create an empty snapshot stamped with `timestamp`.
    pub fn at(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn is_degraded(&self, category: MetricCategory) -> bool {
        self.degraded.contains(&category)
    }
}

/// CPU information and usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    /// Overall CPU usage percentage (0.0 to 100.0)
    pub usage: f32,
    /// Load averages (1, 5, 15 minutes)
    pub load_average: [f64; 3],
    /// Number of logical cores
    pub cores: u32,
    /// CPU model name
    pub model: String,
    /// CPU architecture (e.g., "x86_64")
    pub manufacturer: String,
    /// Current frequency in MHz
    pub speed: u64,
    /// Per-core usage percentages
    pub core_usage: Vec<f32>,
}

/// Memory usage information, all values in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub total: u64,
    pub used: u64,
    /// Memory available to new allocations
    pub free: u64,
    pub cached: u64,
    pub buffers: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
    /// Usage percentage (0.0 to 100.0)
    pub percentage: f32,
}

/// Disk partitions plus computed I/O rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub drives: Vec<DrivePartition>,
    /// Absent until the sampler has a baseline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<DiskIoRates>,
}

/// A mounted partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePartition {
    /// Device name (e.g., "/dev/sda1")
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub use_percent: f32,
}

/// Raw cumulative disk I/O counters summed across whole disks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
}

/// Disk I/O deltas for the last interval and their per-second rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIoRates {
    #[serde(rename = "readBytes")]
    pub read_bytes: u64,
    #[serde(rename = "writeBytes")]
    pub write_bytes: u64,
    #[serde(rename = "readCount")]
    pub read_count: u64,
    #[serde(rename = "writeCount")]
    pub write_count: u64,
    #[serde(rename = "readBytes_sec")]
    pub read_bytes_sec: f64,
    #[serde(rename = "writeBytes_sec")]
    pub write_bytes_sec: f64,
    #[serde(rename = "readCount_sec")]
    pub read_count_sec: f64,
    #[serde(rename = "writeCount_sec")]
    pub write_count_sec: f64,
}

/// Network interfaces plus computed I/O rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub interfaces: Vec<NetworkInterface>,
    /// Per-interface rates, absent until the sampler has a baseline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<InterfaceRate>>,
    /// Total received bytes per second across interfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rx: Option<f64>,
    /// Total transmitted bytes per second across interfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tx: Option<f64>,
}

/// Network interface description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Interface name (e.g., "eth0")
    pub name: String,
    pub mac: Option<String>,
    /// Whether the interface has carried any traffic
    pub is_up: bool,
}

/// Raw cumulative counters for one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// Cumulative counters for one interface alongside its byte rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRate {
    pub iface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    /// Absent for an interface seen for the first time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_sec: Option<f64>,
}

/// GPU controllers and aggregate figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuMetrics {
    pub controllers: Vec<GpuController>,
    pub count: u32,
    #[serde(rename = "totalVRAM")]
    pub total_vram: u64,
    #[serde(rename = "totalVRAMUsed")]
    pub total_vram_used: u64,
    #[serde(rename = "totalVRAMFree")]
    pub total_vram_free: u64,
    pub vram_percentage: f64,
    pub avg_usage: f64,
    pub max_temperature: u32,
}

impl GpuMetrics {
    /// Build the aggregate figures from a list of controllers.
    pub fn from_controllers(controllers: Vec<GpuController>) -> Self {
        let count = controllers.len() as u32;
        let total_vram: u64 = controllers.iter().map(|c| c.vram).sum();
        let total_vram_used: u64 = controllers.iter().map(|c| c.vram_used).sum();
        let total_usage: u64 = controllers.iter().map(|c| u64::from(c.usage)).sum();
        let max_temperature = controllers.iter().map(|c| c.temperature).max().unwrap_or(0);

        Self {
            count,
            total_vram,
            total_vram_used,
            total_vram_free: total_vram.saturating_sub(total_vram_used),
            vram_percentage: percent(total_vram_used, total_vram),
            avg_usage: if count > 0 {
                total_usage as f64 / f64::from(count)
            } else {
                0.0
            },
            max_temperature,
            controllers,
        }
    }
}

/// A single GPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuController {
    pub vendor: String,
    pub model: String,
    pub index: u32,
    /// VRAM in bytes
    pub vram: u64,
    pub vram_used: u64,
    pub vram_free: u64,
    pub vram_percentage: f64,
    /// GPU utilization percentage
    pub usage: u32,
    /// Memory controller utilization percentage
    pub memory_usage: u32,
    /// Celsius
    pub temperature: u32,
    /// Watts
    pub power_usage: f64,
    /// Percent of maximum fan speed
    pub fan_speed: u32,
    /// Graphics clock in MHz
    pub clock_speed: u32,
    /// Memory clock in MHz
    pub memory_clock_speed: u32,
}

/// Temperature sensors grouped by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureMetrics {
    /// Hottest CPU-like sensor in Celsius
    pub cpu: f32,
    pub sensors: BTreeMap<String, SensorReading>,
    /// Hottest reading across all sensors
    pub max: f32,
}

/// Readings of one sensor group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Average of the current readings
    pub current: f32,
    pub max: f32,
    pub cores: Vec<f32>,
}

/// Process table summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub total: u64,
    pub running: u64,
    pub sleeping: u64,
    pub stopped: u64,
    pub zombie: u64,
    #[serde(rename = "topByCPU")]
    pub top_by_cpu: Vec<ProcessEntry>,
    #[serde(rename = "topByMemory")]
    pub top_by_memory: Vec<ProcessEntry>,
}

/// One row of the process table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// CPU usage percentage
    pub cpu: f32,
    /// Share of total memory in percent
    pub memory: f32,
    pub user: Option<String>,
    pub status: String,
}

/// Host identity, collected once at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSystemInfo {
    pub hostname: String,
    pub platform: String,
    pub platform_release: String,
    pub platform_version: String,
    pub architecture: String,
    pub processor: String,
    pub cpu: StaticCpuInfo,
    pub memory: StaticMemoryInfo,
    /// Seconds since boot at collection time
    pub uptime: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticCpuInfo {
    pub cores: u32,
    /// MHz
    pub frequency: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticMemoryInfo {
    pub total: u64,
    pub total_swap: u64,
}

/// `part / whole` as a percentage, zero when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
