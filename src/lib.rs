//! # ServWatch Agent
//!
//! A host-resident monitoring agent that samples system metrics on a fixed
//! interval and streams them to a remote collector over Socket.IO.
//!
//! ## Features
//!
//! - **Typed snapshots**: CPU, memory, disks, network, GPU, temperatures, processes
//! - **Rates from counters**: disk and network throughput computed between samples
//! - **Dual-interval loop**: sample often, transmit less often
//! - **Resilient delivery**: automatic reconnection and a bounded drop-oldest buffer
//! - **Library + Binary**: Use as a crate or standalone application
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use servwatch_agent::{Agent, AgentConfig, SystemCollector, SocketIoTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = AgentConfig::default().with_server_url("http://collector:3001");
//!     config.resolve_identity();
//!
//!     let transport = SocketIoTransport::new(config.collector_url()?, config.reconnect_options());
//!     let mut agent = Agent::new(config, SystemCollector::new()?, transport);
//!
//!     let handle = agent.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.stop();
//!     });
//!
//!     agent.run().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod transport;

// Re-export public API
pub use agent::{Agent, AgentHandle, AgentStatus};
pub use config::{AgentConfig, CliOverrides, MetricsConfig};
pub use error::{AgentError, Result};
pub use metrics::{
    collector::SystemCollector,
    data::{MetricCategory, MetricsSnapshot, StaticSystemInfo},
    rate::{CounterSample, RateTracker},
    sampler::Sampler,
    traits::MetricsProvider,
};
pub use transport::{
    ConnectionEvent, ConnectionManager, ConnectionState, Delivery, OutboundBuffer,
    OutboundMessage, SocketIoTransport, Transport, TransportEvent,
};

/// Default number of messages held while the collector is unreachable
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Default sampling and transmission interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
