//! Delivery of snapshots to the remote collector.
//!
//! A [`Transport`] is an event-based channel to the collector, Socket.IO in
//! production. The [`ConnectionManager`] sits on top of it: it tracks the
//! connection state, registers the agent, and queues snapshots in the
//! [`OutboundBuffer`] for its delivery worker.

pub mod backoff;
pub mod buffer;
pub mod connection;
pub mod socketio;

pub use backoff::BackoffController;
pub use buffer::{OutboundBuffer, OutboundMessage};
pub use connection::{ConnectionEvent, ConnectionManager, Delivery};
pub use socketio::SocketIoTransport;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outgoing one-time registration, carries `{agentId, timestamp}`.
pub const REGISTER_EVENT: &str = "agent:register";
/// Outgoing snapshot, carries `{agentId, ...snapshot}`.
pub const DATA_EVENT: &str = "metrics:data";
/// Incoming acknowledgment of the registration.
pub const REGISTERED_EVENT: &str = "agent:registered";

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Lifecycle notifications and inbound messages reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection attempt is starting; `attempt` counts from 1 since the last success.
    Connecting { attempt: u32 },
    Connected,
    /// A connection attempt failed.
    ConnectError(String),
    /// An established connection was lost or closed.
    Disconnected(String),
    /// An error reported by the client library outside a connection attempt.
    Error(String),
    /// An application event from the collector.
    Message { event: String, data: Value },
}

/// Reconnection policy handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOptions {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0 means unbounded
    pub max_attempts: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            max_attempts: 0,
        }
    }
}

impl ReconnectOptions {
    /// Whether another attempt may follow `attempts` consecutive failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempts < self.max_attempts)
    }
}

/// Connection-oriented pub/sub channel to the collector.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting in the background. Lifecycle changes and inbound
    /// messages are reported on `events`; reconnection is the transport's job.
    async fn open(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<()>;

    /// Send one named event. Fails with `NotConnected` when there is no live link.
    async fn emit(&self, event: &str, payload: &Value) -> Result<()>;

    /// Stop reconnecting and close the link.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<()> {
        (**self).open(events).await
    }

    async fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        (**self).emit(event, payload).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
