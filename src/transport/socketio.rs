//! Socket.IO transport.
//!
//! The collector is a Socket.IO server: events travel as Socket.IO packets
//! over an Engine.IO session on `<url>/socket.io/`. Once a session has been
//! established the client library reconnects on its own with the configured
//! delays. The library gives up when the very first handshake fails, so that
//! first session is retried here with the same policy.

use super::{BackoffController, ReconnectOptions, Transport, TransportEvent, REGISTERED_EVENT};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::{Event, Payload};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Collector events surfaced as [`TransportEvent::Message`].
const INBOUND_EVENTS: &[&str] = &[REGISTERED_EVENT];

/// Socket.IO client connection to the collector.
pub struct SocketIoTransport {
    url: String,
    options: ReconnectOptions,
    client: Arc<Mutex<Option<Client>>>,
    shutdown: watch::Sender<bool>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl SocketIoTransport {
    /// Create a transport for an `http://` or `https://` collector URL.
    pub fn new(url: impl Into<String>, options: ReconnectOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            url: url.into(),
            options,
            client: Arc::new(Mutex::new(None)),
            shutdown,
            task: StdMutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn open(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let handshaking = task.as_ref().is_some_and(|t| !t.is_finished());
        let established = self
            .client
            .try_lock()
            .map_or(true, |client| client.is_some());
        if handshaking || established {
            return Err(AgentError::transport_error("Transport is already open"));
        }

        self.shutdown.send_replace(false);
        let session = Session {
            url: self.url.clone(),
            options: self.options,
            client: Arc::clone(&self.client),
            link: Arc::new(Link::new(events)),
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(session.establish()));

        Ok(())
    }

    async fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        // Waits while a handshake is in flight, so nothing is emitted on a
        // half-built session.
        let client = self.client.lock().await.clone().ok_or(AgentError::NotConnected)?;

        client
            .emit(event, Payload::Text(vec![payload.clone()]))
            .await
            .map_err(|e| AgentError::transport_error(format!("Failed to emit {}: {}", event, e)))
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("Socket.IO handshake did not stop in time, aborting");
                task.abort();
            }
        }

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            match tokio::time::timeout(CLOSE_TIMEOUT, client.disconnect()).await {
                Ok(Ok(())) => debug!("Socket.IO session closed"),
                Ok(Err(e)) => debug!(error = %e, "Error while closing Socket.IO session"),
                Err(_) => warn!("Socket.IO disconnect timed out"),
            }
        }

        Ok(())
    }
}

/// Connection status shared with the library callbacks.
struct Link {
    events: mpsc::UnboundedSender<TransportEvent>,
    up: AtomicBool,
}

impl Link {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            up: AtomicBool::new(false),
        }
    }

    /// Report `Connected` once per session, whichever of the handshake or
    /// the library's connect callback gets there first.
    fn connected(&self) {
        if !self.up.swap(true, Ordering::SeqCst) {
            self.report(TransportEvent::Connected);
        }
    }

    fn disconnected(&self, reason: String) {
        if self.up.swap(false, Ordering::SeqCst) {
            self.report(TransportEvent::Disconnected(reason));
        }
    }

    fn report(&self, event: TransportEvent) {
        // The receiver is gone once the connection manager has shut down.
        let _ = self.events.send(event);
    }
}

/// First-session handshake, retried until it succeeds or the policy gives up.
struct Session {
    url: String,
    options: ReconnectOptions,
    client: Arc<Mutex<Option<Client>>>,
    link: Arc<Link>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    async fn establish(mut self) {
        let mut backoff = BackoffController::new(self.options.initial_delay, self.options.max_delay);

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let attempt = backoff.failures() + 1;
            self.link.report(TransportEvent::Connecting { attempt });
            debug!(url = %self.url, attempt, "Connecting to collector");

            let mut slot = self.client.lock().await;
            let builder = client_builder(&self.url, &self.options, &self.link);
            let connected = tokio::select! {
                result = builder.connect() => result,
                _ = self.shutdown.changed() => return,
            };

            match connected {
                Ok(client) => {
                    *slot = Some(client);
                    drop(slot);
                    info!(url = %self.url, "Socket.IO session established");
                    self.link.connected();
                    return;
                }
                Err(e) => {
                    drop(slot);
                    self.link.report(TransportEvent::ConnectError(e.to_string()));
                    if !self.options.allows_retry(attempt) {
                        warn!(attempts = attempt, "Giving up on collector connection");
                        return;
                    }
                }
            }

            let delay = backoff.mark_failure();
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => return,
            }
        }
    }
}

fn client_builder(url: &str, options: &ReconnectOptions, link: &Arc<Link>) -> ClientBuilder {
    let mut builder = ClientBuilder::new(url)
        .reconnect(options.enabled)
        .reconnect_on_disconnect(options.enabled)
        .reconnect_delay(millis(options.initial_delay), millis(options.max_delay));
    if options.max_attempts > 0 {
        let attempts = u8::try_from(options.max_attempts).unwrap_or(u8::MAX);
        builder = builder.max_reconnect_attempts(attempts);
    }

    let on_connect = Arc::clone(link);
    builder = builder.on(Event::Connect, move |_payload: Payload, _client: Client| {
        let link = Arc::clone(&on_connect);
        async move { link.connected() }.boxed()
    });

    let on_close = Arc::clone(link);
    builder = builder.on(Event::Close, move |_payload: Payload, _client: Client| {
        let link = Arc::clone(&on_close);
        async move { link.disconnected("closed by collector".to_string()) }.boxed()
    });

    let on_error = Arc::clone(link);
    builder = builder.on(Event::Error, move |payload: Payload, _client: Client| {
        let link = Arc::clone(&on_error);
        async move {
            let reason = match payload_value(payload) {
                Value::String(text) => text,
                other => other.to_string(),
            };
            link.report(TransportEvent::Error(reason));
        }
        .boxed()
    });

    for &name in INBOUND_EVENTS {
        let inbound = Arc::clone(link);
        builder = builder.on(name, move |payload: Payload, _client: Client| {
            let link = Arc::clone(&inbound);
            async move {
                link.report(TransportEvent::Message {
                    event: name.to_string(),
                    data: payload_value(payload),
                });
            }
            .boxed()
        });
    }

    builder
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The single JSON argument of an event, `Null` when there is none.
fn payload_value(payload: Payload) -> Value {
    match payload {
        Payload::Text(mut values) if values.len() == 1 => values.remove(0),
        Payload::Text(values) if values.is_empty() => Value::Null,
        Payload::Text(values) => Value::Array(values),
        _ => Value::Null,
    }
}
