//! Traits for system metrics collection.

use crate::error::Result;
use crate::metrics::data::*;
use crate::metrics::sampler::unix_millis;

/// Source of raw host metrics.
///
/// Each category is fetched independently so that one failing source does not
/// hide the others. Counter methods return cumulative values; turning them
/// into rates is the sampler's job. Implementations may block on OS calls.
pub trait MetricsProvider: Send {
    /// Refresh cached OS state before a round of category reads.
    fn refresh(&mut self) {}

    /// Wall-clock milliseconds stamped on the next snapshot. Failing here
    /// fails the whole tick.
    fn timestamp(&mut self) -> Result<u64> {
        unix_millis()
    }

    fn cpu(&mut self) -> Result<CpuMetrics>;

    fn memory(&mut self) -> Result<MemoryMetrics>;

    fn disk_partitions(&mut self) -> Result<Vec<DrivePartition>>;

    /// Cumulative I/O counters summed across whole disks.
    fn disk_counters(&mut self) -> Result<DiskCounters>;

    fn network_interfaces(&mut self) -> Result<Vec<NetworkInterface>>;

    /// Cumulative byte and packet counters per interface.
    fn network_counters(&mut self) -> Result<Vec<InterfaceCounters>>;

    fn gpu(&mut self) -> Result<GpuMetrics>;

    fn temperatures(&mut self) -> Result<TemperatureMetrics>;

    fn processes(&mut self) -> Result<ProcessMetrics>;

    /// Host identity. Called once at startup.
    fn static_system_info(&mut self) -> Result<StaticSystemInfo>;
}
