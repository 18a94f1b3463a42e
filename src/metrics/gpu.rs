//! GPU monitoring.
//!
//! NVIDIA GPUs are read through NVML when the `gpu` feature is enabled. Without
//! the feature the agent compiles against a provider that reports no GPUs.

use crate::error::Result;
use crate::metrics::data::GpuMetrics;

/// Trait for GPU reads.
pub trait GpuProvider: Send {
    /// Read every GPU and the aggregate figures.
    fn read_gpu_status(&mut self) -> Result<GpuMetrics>;

    /// Whether a GPU library was found on this host.
    fn is_available(&self) -> bool;
}

#[cfg(feature = "gpu")]
mod nvidia {
    use super::*;
    use crate::error::AgentError;
    use crate::metrics::data::{percent, GpuController};
    use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
    use nvml_wrapper::Nvml;

    /// NVIDIA GPU provider using NVML.
    pub struct NvmlGpu {
        nvml: Nvml,
    }

    impl NvmlGpu {
        pub fn new() -> Result<Self> {
            let nvml = Nvml::init()
                .map_err(|e| AgentError::gpu_error(format!("Failed to initialize NVML: {}", e)))?;
            Ok(Self { nvml })
        }
    }

    impl GpuProvider for NvmlGpu {
        fn read_gpu_status(&mut self) -> Result<GpuMetrics> {
            let count = self
                .nvml
                .device_count()
                .map_err(|e| AgentError::gpu_error(format!("Failed to count devices: {}", e)))?;

            let mut controllers = Vec::with_capacity(count as usize);
            for index in 0..count {
                let device = self.nvml.device_by_index(index).map_err(|e| {
                    AgentError::gpu_error(format!("Failed to open device {}: {}", index, e))
                })?;

                let model = device.name().unwrap_or_else(|_| "Unknown".to_string());
                let (vram, vram_used, vram_free) = device
                    .memory_info()
                    .map(|m| (m.total, m.used, m.free))
                    .unwrap_or((0, 0, 0));
                let (usage, memory_usage) = device
                    .utilization_rates()
                    .map(|u| (u.gpu, u.memory))
                    .unwrap_or((0, 0));

                // Optional readings; many consumer boards do not expose all of them.
                controllers.push(GpuController {
                    vendor: "NVIDIA".to_string(),
                    model,
                    index,
                    vram,
                    vram_used,
                    vram_free,
                    vram_percentage: percent(vram_used, vram),
                    usage,
                    memory_usage,
                    temperature: device.temperature(TemperatureSensor::Gpu).unwrap_or(0),
                    power_usage: device
                        .power_usage()
                        .map(|mw| f64::from(mw) / 1000.0)
                        .unwrap_or(0.0),
                    fan_speed: device.fan_speed(0).unwrap_or(0),
                    clock_speed: device.clock_info(Clock::Graphics).unwrap_or(0),
                    memory_clock_speed: device.clock_info(Clock::Memory).unwrap_or(0),
                });
            }

            Ok(GpuMetrics::from_controllers(controllers))
        }

        fn is_available(&self) -> bool {
            true
        }
    }
}

#[cfg(not(feature = "gpu"))]
mod none {
    use super::*;

    /// Provider for builds without GPU support.
    pub struct NoGpu;

    impl NoGpu {
        pub fn new() -> Result<Self> {
            Ok(Self)
        }
    }

    impl GpuProvider for NoGpu {
        fn read_gpu_status(&mut self) -> Result<GpuMetrics> {
            Ok(GpuMetrics::default())
        }

        fn is_available(&self) -> bool {
            false
        }
    }
}

#[cfg(feature = "gpu")]
pub use nvidia::NvmlGpu as DefaultGpuProvider;

#[cfg(not(feature = "gpu"))]
pub use none::NoGpu as DefaultGpuProvider;
