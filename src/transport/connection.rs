//! Connection state machine and background delivery.
//!
//! States move `Disconnected -> Connecting -> Connected`, falling back to
//! `Disconnected` on any transport error. Transport lifecycle events are
//! consumed by an event pump task; a delivery worker task drains the
//! [`OutboundBuffer`] while the connection is up. Callers never wait on the
//! network: `transmit` only queues, and every send is bounded by
//! [`SEND_TIMEOUT`].

use super::{
    ConnectionState, OutboundBuffer, OutboundMessage, Transport, TransportEvent, DATA_EVENT,
    REGISTERED_EVENT, REGISTER_EVENT,
};
use crate::error::{AgentError, Result};
use crate::metrics::MetricsSnapshot;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on how long the idle worker sleeps before re-checking.
const IDLE_POLL: Duration = Duration::from_millis(100);
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest a single emit may take before it counts as failed.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications a caller can subscribe to with [`ConnectionManager::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// Link established; payload is null.
    Connected,
    /// Link established again after an earlier connection; payload is null.
    Reconnected,
    /// The collector acknowledged the registration; payload is the ack data.
    Registered,
    /// Link lost; payload is the reason string.
    Disconnected,
    /// Connection attempt failed; payload is the reason string.
    ConnectError,
}

/// Outcome of [`ConnectionManager::transmit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Connected with nothing queued: handed to the delivery worker, which
    /// sends it right away. A failed send leaves it in the buffer.
    Dispatched,
    /// Queued behind a backlog or while disconnected; `evicted` is set when
    /// the oldest buffered message was dropped to make room.
    Buffered { evicted: bool },
}

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Shared<T> {
    agent_id: String,
    transport: T,
    buffer: OutboundBuffer,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    callbacks: Mutex<HashMap<ConnectionEvent, Vec<Callback>>>,
    ever_connected: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the transport, the outbound buffer and the delivery worker.
pub struct ConnectionManager<T: Transport> {
    shared: Arc<Shared<T>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(agent_id: impl Into<String>, transport: T, buffer_capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                agent_id: agent_id.into(),
                transport,
                buffer: OutboundBuffer::new(buffer_capacity),
                state,
                shutdown,
                callbacks: Mutex::new(HashMap::new()),
                ever_connected: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
            pump: Mutex::new(None),
        }
    }

    /// Start connecting. Returns once the transport has been opened; the
    /// handshake and any reconnects continue in the background.
    pub async fn connect(&self) -> Result<()> {
        if lock(&self.pump).as_ref().is_some_and(|p| !p.is_finished()) {
            debug!("Connect requested while already running");
            return Ok(());
        }

        self.shared.shutdown.send_replace(false);
        self.shared.state.send_replace(ConnectionState::Connecting);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.shared.transport.open(tx).await {
            self.shared.state.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        *lock(&self.pump) = Some(tokio::spawn(pump_events(shared, rx)));
        Ok(())
    }

    /// Hand a snapshot to the collector.
    ///
    /// Never waits on the network and never fails. When connected with an
    /// empty buffer the delivery worker sends the snapshot immediately;
    /// otherwise it waits behind the backlog so delivery stays in order.
    pub fn transmit(&self, snapshot: MetricsSnapshot) -> Delivery {
        let message = OutboundMessage::new(self.shared.agent_id.clone(), snapshot);
        let dispatch = self.is_connected() && self.shared.buffer.is_empty();

        let evicted = self.shared.buffer.enqueue(message).is_some();
        if evicted {
            warn!(capacity = self.shared.buffer.capacity(), "Buffer full, dropped oldest snapshot");
        }

        if dispatch && !evicted {
            Delivery::Dispatched
        } else {
            Delivery::Buffered { evicted }
        }
    }

    /// Stop the worker, close the transport and settle in `Disconnected`.
    /// Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let pump = lock(&self.pump).take();
        let worker = lock(&self.shared.worker).take();
        if pump.is_none() && worker.is_none() {
            self.shared.state.send_replace(ConnectionState::Disconnected);
            return;
        }

        self.shared.shutdown.send_replace(true);
        if let Some(pump) = pump {
            pump.abort();
        }

        match tokio::time::timeout(SEND_TIMEOUT, self.shared.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Error while closing transport"),
            Err(_) => warn!("Closing the transport timed out"),
        }

        if let Some(mut worker) = worker {
            if tokio::time::timeout(WORKER_STOP_TIMEOUT, &mut worker).await.is_err() {
                worker.abort();
            }
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!(buffered = self.shared.buffer.size(), "Disconnected from collector");
    }

    /// Register `callback` for `event`. Callbacks run on the event pump task
    /// and must not block.
    pub fn on<F>(&self, event: ConnectionEvent, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks)
            .entry(event)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the state equals `target`, up to `timeout`.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer.size()
    }

    pub fn buffer(&self) -> &OutboundBuffer {
        &self.shared.buffer
    }

    pub fn agent_id(&self) -> &str {
        &self.shared.agent_id
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        if let Some(worker) = lock(&self.shared.worker).take() {
            worker.abort();
        }
    }
}

impl<T: Transport> Shared<T> {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let payload = message.to_payload()?;
        self.emit(DATA_EVENT, &payload).await
    }

    async fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        tokio::time::timeout(SEND_TIMEOUT, self.transport.emit(event, payload))
            .await
            .map_err(|_| AgentError::transport_error(format!("Emitting {} timed out", event)))?
    }

    fn fire(&self, event: ConnectionEvent, payload: &Value) {
        let callbacks = lock(&self.callbacks).get(&event).cloned().unwrap_or_default();
        for callback in callbacks {
            callback(payload);
        }
    }

    async fn register(&self) {
        let payload = json!({
            "agentId": self.agent_id,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        match self.emit(REGISTER_EVENT, &payload).await {
            Ok(()) => debug!(agent_id = %self.agent_id, "Registration sent"),
            Err(e) => warn!(error = %e, "Failed to send registration"),
        }
    }

    fn ensure_worker(self: &Arc<Self>) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }
        *worker = Some(tokio::spawn(deliver(Arc::clone(self))));
    }

    async fn handle(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connecting { attempt } => {
                self.state.send_replace(ConnectionState::Connecting);
                debug!(attempt, "Connecting");
            }
            TransportEvent::Connected => {
                let reconnected = self.ever_connected.swap(true, Ordering::SeqCst);
                info!(agent_id = %self.agent_id, "Connected to collector");

                // Registration goes out before any snapshot on this link.
                self.register().await;
                self.state.send_replace(ConnectionState::Connected);
                self.ensure_worker();

                self.fire(ConnectionEvent::Connected, &Value::Null);
                if reconnected {
                    self.fire(ConnectionEvent::Reconnected, &Value::Null);
                }
            }
            TransportEvent::ConnectError(reason) => {
                self.state.send_replace(ConnectionState::Disconnected);
                debug!(reason = %reason, "Connection attempt failed");
                self.fire(ConnectionEvent::ConnectError, &Value::String(reason));
            }
            TransportEvent::Disconnected(reason) => {
                self.state.send_replace(ConnectionState::Disconnected);
                debug!(reason = %reason, "Connection lost");
                self.fire(ConnectionEvent::Disconnected, &Value::String(reason));
            }
            TransportEvent::Error(reason) => {
                if *self.state.borrow() == ConnectionState::Connected {
                    warn!(reason = %reason, "Transport error");
                } else {
                    self.state.send_replace(ConnectionState::Disconnected);
                    debug!(reason = %reason, "Transport error while not connected");
                    self.fire(ConnectionEvent::ConnectError, &Value::String(reason));
                }
            }
            TransportEvent::Message { event, data } if event == REGISTERED_EVENT => {
                self.fire(ConnectionEvent::Registered, &data);
            }
            TransportEvent::Message { event, .. } => {
                debug!(event = %event, "Ignoring collector event");
            }
        }
    }
}

async fn pump_events<T: Transport>(shared: Arc<Shared<T>>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        shared.handle(event).await;
    }
    shared.state.send_replace(ConnectionState::Disconnected);
    debug!("Transport event stream ended");
}

/// Drain the buffer one message at a time while connected.
async fn deliver<T: Transport>(shared: Arc<Shared<T>>) {
    let mut state = shared.state.subscribe();
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let connected = *state.borrow_and_update() == ConnectionState::Connected;
        if connected {
            if let Some(message) = shared.buffer.try_dequeue() {
                match shared.send(&message).await {
                    Ok(()) => continue,
                    Err(e) => {
                        debug!(error = %e, "Buffered send failed");
                        if !shared.buffer.restore(message) {
                            warn!(
                                capacity = shared.buffer.capacity(),
                                "Buffer refilled during a failed send, dropped the unsent snapshot"
                            );
                        }
                    }
                }
                tokio::select! {
                    _ = state.changed() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            }
        }

        tokio::select! {
            _ = shared.buffer.notified() => {}
            _ = state.changed() => {}
            _ = tokio::time::sleep(IDLE_POLL) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Delivery worker stopped");
}
