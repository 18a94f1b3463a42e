//! The agent loop.
//!
//! Sampling and transmission run on separate intervals: every collect tick
//! produces a snapshot (keeping rate baselines fresh) and only the latest one
//! is handed to the [`ConnectionManager`] once the transmit interval has
//! elapsed. Handing over never touches the network; delivery happens on the
//! connection's own worker, so a slow or missing collector never delays
//! sampling or shutdown.

use crate::config::AgentConfig;
use crate::error::Result;
use crate::metrics::{MetricsProvider, MetricsSnapshot, Sampler, StaticSystemInfo};
use crate::transport::{ConnectionEvent, ConnectionManager, ConnectionState, Delivery, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Point-in-time view of a running agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub running: bool,
    pub agent_id: String,
    pub connection: ConnectionState,
    /// Messages waiting in the outbound buffer after the last tick
    pub buffered: usize,
    pub samples: u64,
    pub transmissions: u64,
    pub failed_ticks: u64,
}

struct Control {
    agent_id: String,
    running: AtomicBool,
    stop_requested: AtomicBool,
    stop: Notify,
    samples: AtomicU64,
    transmissions: AtomicU64,
    failed_ticks: AtomicU64,
    buffered: AtomicUsize,
    connection: watch::Receiver<ConnectionState>,
}

/// Cloneable handle for stopping and inspecting an [`Agent`] from another task.
#[derive(Clone)]
pub struct AgentHandle {
    control: Arc<Control>,
}

impl AgentHandle {
    /// Ask the loop to exit. Safe to call from a signal handler task, and
    /// more than once.
    pub fn stop(&self) {
        self.control.stop_requested.store(true, Ordering::SeqCst);
        self.control.stop.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.control.stop_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> AgentStatus {
        let control = &self.control;
        AgentStatus {
            running: control.running.load(Ordering::SeqCst),
            agent_id: control.agent_id.clone(),
            connection: *control.connection.borrow(),
            buffered: control.buffered.load(Ordering::SeqCst),
            samples: control.samples.load(Ordering::SeqCst),
            transmissions: control.transmissions.load(Ordering::SeqCst),
            failed_ticks: control.failed_ticks.load(Ordering::SeqCst),
        }
    }
}

/// Dual-interval sampling and transmission loop.
pub struct Agent<P: MetricsProvider, T: Transport> {
    config: AgentConfig,
    sampler: Sampler<P>,
    connection: ConnectionManager<T>,
    control: Arc<Control>,
}

impl<P: MetricsProvider, T: Transport> Agent<P, T> {
    pub fn new(config: AgentConfig, provider: P, transport: T) -> Self {
        let sampler = Sampler::new(provider, config.effective_metrics());
        let connection =
            ConnectionManager::new(config.agent_id(), transport, config.agent.buffer_capacity);

        connection.on(ConnectionEvent::Registered, |_| info!("Registered with collector"));
        connection.on(ConnectionEvent::Reconnected, |_| info!("Reconnected to collector"));
        connection.on(ConnectionEvent::Disconnected, |reason| {
            warn!(reason = %reason, "Disconnected from collector");
        });
        connection.on(ConnectionEvent::ConnectError, |reason| {
            warn!(reason = %reason, "Connection to collector failed");
        });

        let control = Arc::new(Control {
            agent_id: config.agent_id().to_string(),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop: Notify::new(),
            samples: AtomicU64::new(0),
            transmissions: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            buffered: AtomicUsize::new(0),
            connection: connection.subscribe_state(),
        });

        Self {
            config,
            sampler,
            connection,
            control,
        }
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    /// Run until [`AgentHandle::stop`] is called, then disconnect.
    ///
    /// Single-tick failures are logged and never end the loop.
    pub async fn run(&mut self) -> Result<()> {
        if self.handle().is_stop_requested() {
            debug!("Stop requested before start");
            return Ok(());
        }

        let collect_interval = self.config.collect_interval();
        let transmit_interval = self.config.transmit_interval();
        info!(
            agent_id = %self.config.agent_id(),
            name = %self.config.agent_name(),
            collect_ms = collect_interval.as_millis() as u64,
            transmit_ms = transmit_interval.as_millis() as u64,
            "Starting agent"
        );

        self.control.running.store(true, Ordering::SeqCst);
        let mut system_info = self.read_system_info();

        if let Err(e) = self.connection.connect().await {
            warn!(error = %e, "Could not start collector connection, buffering snapshots");
        }

        let mut last_transmit = Instant::now();
        while !self.control.stop_requested.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            match self.sampler.collect_all() {
                Ok(mut snapshot) => {
                    self.control.samples.fetch_add(1, Ordering::SeqCst);

                    if tick_start.duration_since(last_transmit) >= transmit_interval {
                        if let Some(info) = system_info.take() {
                            snapshot.system_info = Some(info);
                        }
                        transmit(&self.connection, &self.control, snapshot);
                        last_transmit = tick_start;
                    }
                }
                Err(e) => {
                    self.control.failed_ticks.fetch_add(1, Ordering::SeqCst);
                    error!(error = %e, "Collection tick failed");
                }
            }

            self.control
                .buffered
                .store(self.connection.buffer_size(), Ordering::SeqCst);

            let sleep_for = collect_interval.saturating_sub(tick_start.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.control.stop.notified() => {}
            }
        }

        info!("Stopping agent");
        self.connection.disconnect().await;
        self.control.running.store(false, Ordering::SeqCst);
        info!(samples = self.control.samples.load(Ordering::SeqCst), "Agent stopped");

        Ok(())
    }

    fn read_system_info(&mut self) -> Option<StaticSystemInfo> {
        match self.sampler.static_system_info() {
            Ok(info) => {
                debug!(hostname = %info.hostname, "Static system info collected");
                Some(info)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read static system info");
                None
            }
        }
    }
}

fn transmit<T: Transport>(
    connection: &ConnectionManager<T>,
    control: &Control,
    snapshot: MetricsSnapshot,
) {
    control.transmissions.fetch_add(1, Ordering::SeqCst);
    match connection.transmit(snapshot) {
        Delivery::Dispatched => debug!("Snapshot dispatched"),
        Delivery::Buffered { evicted } => debug!(
            buffered = connection.buffer_size(),
            evicted,
            "Snapshot buffered"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::metrics::data::*;
    use crate::transport::TransportEvent;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Transport that never connects, so every snapshot lands in the buffer.
    struct OfflineTransport;

    #[async_trait]
    impl Transport for OfflineTransport {
        async fn open(&self, _events: mpsc::UnboundedSender<TransportEvent>) -> Result<()> {
            Ok(())
        }

        async fn emit(&self, _event: &str, _payload: &Value) -> Result<()> {
            Err(AgentError::NotConnected)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Transport that connects at once and then never completes a send.
    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn open(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<()> {
            events
                .send(TransportEvent::Connected)
                .map_err(|e| AgentError::transport_error(e.to_string()))
        }

        async fn emit(&self, _event: &str, _payload: &Value) -> Result<()> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Provider stamping the CPU usage with the sample number.
    #[derive(Default)]
    struct CountingProvider {
        ticks: u32,
        clock_reads: u32,
        /// Clock reads (1-based) that fail.
        broken_clock_reads: Vec<u32>,
    }

    impl MetricsProvider for CountingProvider {
        fn refresh(&mut self) {
            self.ticks += 1;
        }

        fn timestamp(&mut self) -> Result<u64> {
            self.clock_reads += 1;
            if self.broken_clock_reads.contains(&self.clock_reads) {
                return Err(AgentError::clock_error("clock unavailable"));
            }
            Ok(u64::from(self.clock_reads) * 1000)
        }

        fn cpu(&mut self) -> Result<CpuMetrics> {
            Ok(CpuMetrics {
                usage: self.ticks as f32,
                ..Default::default()
            })
        }

        fn memory(&mut self) -> Result<MemoryMetrics> {
            Err(AgentError::collection_error(MetricCategory::Memory, "unavailable"))
        }

        fn disk_partitions(&mut self) -> Result<Vec<DrivePartition>> {
            Ok(Vec::new())
        }

        fn disk_counters(&mut self) -> Result<DiskCounters> {
            Ok(DiskCounters::default())
        }

        fn network_interfaces(&mut self) -> Result<Vec<NetworkInterface>> {
            Ok(Vec::new())
        }

        fn network_counters(&mut self) -> Result<Vec<InterfaceCounters>> {
            Ok(Vec::new())
        }

        fn gpu(&mut self) -> Result<GpuMetrics> {
            Ok(GpuMetrics::default())
        }

        fn temperatures(&mut self) -> Result<TemperatureMetrics> {
            Ok(TemperatureMetrics::default())
        }

        fn processes(&mut self) -> Result<ProcessMetrics> {
            Ok(ProcessMetrics::default())
        }

        fn static_system_info(&mut self) -> Result<StaticSystemInfo> {
            Ok(StaticSystemInfo {
                hostname: "test-host".to_string(),
                ..Default::default()
            })
        }
    }

    fn agent(collect_ms: u64, transmit_ms: u64) -> Agent<CountingProvider, OfflineTransport> {
        let config = AgentConfig::default()
            .with_agent_id("agent-test")
            .with_intervals(collect_ms, transmit_ms);
        Agent::new(config, CountingProvider::default(), OfflineTransport)
    }

    fn stalled_agent(collect_ms: u64, transmit_ms: u64) -> Agent<CountingProvider, StalledTransport> {
        let config = AgentConfig::default()
            .with_agent_id("agent-stalled")
            .with_intervals(collect_ms, transmit_ms);
        Agent::new(config, CountingProvider::default(), StalledTransport)
    }

    fn stop_after(handle: AgentHandle, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            handle.stop();
        });
    }

    fn buffered_usage(agent: &Agent<CountingProvider, OfflineTransport>) -> Vec<f32> {
        agent
            .connection()
            .buffer()
            .drain()
            .into_iter()
            .map(|m| m.snapshot.cpu.usage)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_and_transmission_are_decoupled() {
        let mut agent = agent(100, 500);
        let handle = agent.handle();
        stop_after(handle.clone(), Duration::from_millis(1050));

        agent.run().await.unwrap();

        let status = handle.status();
        assert_eq!(status.samples, 11);
        assert_eq!(status.transmissions, 2);
        assert!(!status.running);

        // Each transmission carries the sample taken on that tick.
        let messages = agent.connection().buffer().drain();
        let usage: Vec<f32> = messages.iter().map(|m| m.snapshot.cpu.usage).collect();
        assert_eq!(usage, vec![6.0, 11.0]);
        assert_eq!(messages[0].agent_id, "agent-test");

        // Host identity rides along with the first transmitted snapshot only.
        assert_eq!(
            messages[0].snapshot.system_info.as_ref().map(|i| i.hostname.as_str()),
            Some("test-host")
        );
        assert!(messages[1].snapshot.system_info.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_transmit_interval_sends_every_tick() {
        let mut agent = agent(200, 50);
        stop_after(agent.handle(), Duration::from_millis(1100));

        agent.run().await.unwrap();

        // The first tick is at the start of the loop, before any interval elapsed.
        assert_eq!(buffered_usage(&agent), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_category_does_not_stop_the_loop() {
        let mut agent = agent(100, 100);
        let handle = agent.handle();
        stop_after(handle.clone(), Duration::from_millis(350));

        agent.run().await.unwrap();

        let messages = agent.connection().buffer().drain();
        assert_eq!(messages.len(), 3);
        assert!(messages
            .iter()
            .all(|m| m.snapshot.is_degraded(MetricCategory::Memory)));
        assert_eq!(handle.status().failed_ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ticks_skip_transmission_and_the_loop_continues() {
        let config = AgentConfig::default()
            .with_agent_id("agent-test")
            .with_intervals(100, 100);
        let provider = CountingProvider {
            broken_clock_reads: vec![3, 4],
            ..Default::default()
        };
        let mut agent = Agent::new(config, provider, OfflineTransport);
        let handle = agent.handle();
        stop_after(handle.clone(), Duration::from_millis(550));

        agent.run().await.unwrap();

        // Ticks at 0..=500 ms; the clock fails on the third and fourth.
        let status = handle.status();
        assert_eq!(status.failed_ticks, 2);
        assert_eq!(status.samples, 4);
        assert_eq!(status.transmissions, 3);

        let timestamps: Vec<u64> = agent
            .connection()
            .buffer()
            .drain()
            .into_iter()
            .map(|m| m.snapshot.timestamp)
            .collect();
        assert_eq!(timestamps, vec![2000, 5000, 6000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_collector_does_not_delay_sampling_or_stop() {
        let mut agent = stalled_agent(100, 100);
        let handle = agent.handle();
        stop_after(handle.clone(), Duration::from_millis(2050));

        tokio::time::timeout(Duration::from_secs(30), agent.run())
            .await
            .expect("run should return after stop")
            .unwrap();

        let status = handle.status();
        assert_eq!(status.samples, 21);
        assert_eq!(status.transmissions, 20);
        assert!(!status.running);
        assert_eq!(status.connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_before_run_returns_immediately() {
        let mut agent = agent(1000, 1000);
        let handle = agent.handle();
        handle.stop();
        handle.stop();

        agent.run().await.unwrap();
        assert_eq!(handle.status().samples, 0);
        assert_eq!(handle.status().connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let mut agent = agent(60_000, 60_000);
        let handle = agent.handle();
        stop_after(handle.clone(), Duration::from_millis(10));

        let started = Instant::now();
        agent.run().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.status().samples, 1);
        assert_eq!(handle.status().agent_id, "agent-test");
    }
}
