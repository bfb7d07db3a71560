//! Subscriber client: connection lifecycle, statistics, message dispatch.
//!
//! Drives the broker transport through an explicit connection state
//! machine and forwards every inbound message to the handler injected at
//! construction. The handler runs synchronously on the transport's
//! receive thread, so a slow handler delays subsequent delivery. The
//! client never reconnects on its own; that policy belongs to the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::transport::{BrokerConfig, MqttTransport, TransportError, TransportSink};

/// Default bounded wait for the asynchronous handshake to settle.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No session; the initial state and the result of `disconnect`
    Disconnected,
    /// A session launch is in flight
    Connecting,
    /// Session up, subscription issued
    Connected,
    /// The last session attempt or session ended with an error
    Error,
}

/// Subscriber-side connection counters.
///
/// Mutated only by the client's own callbacks; [`TelemetrySubscriber::status`]
/// hands out a cloned snapshot so readers never observe a half-updated
/// record.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// Current lifecycle state
    pub state: ClientState,
    /// Subscribed topic
    pub topic: String,
    /// Total messages delivered (monotonic)
    pub messages_received: u64,
    /// When the last message arrived
    pub last_message_time: Option<DateTime<Utc>>,
    /// Most recent connect or session error
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    fn new(topic: String) -> Self {
        Self {
            state: ClientState::Disconnected,
            topic,
            messages_received: 0,
            last_message_time: None,
            last_error: None,
        }
    }

    /// Whether a session is currently up.
    pub fn connected(&self) -> bool {
        self.state == ClientState::Connected
    }
}

/// Handler invoked for every inbound message with the topic, the raw
/// payload, and the decoded JSON value (`None` when decoding failed).
pub type MessageHandler = Box<dyn Fn(&str, &[u8], Option<&Value>) + Send + Sync>;

/// State shared between the caller-facing client and the receive loop.
struct ClientShared {
    status: Mutex<ConnectionStatus>,
    last_message: Mutex<Option<Value>>,
    handler: MessageHandler,
}

impl ClientShared {
    fn status(&self) -> MutexGuard<'_, ConnectionStatus> {
        // A panicking reader must not sever the pipeline.
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        {
            let mut status = self.status();
            status.messages_received += 1;
            status.last_message_time = Some(Utc::now());
        }

        let decoded = match serde_json::from_slice::<Value>(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("payload on {:?} is not JSON: {}", topic, e);
                None
            }
        };

        {
            let mut last = self
                .last_message
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *last = Some(match &decoded {
                Some(value) => value.clone(),
                None => json!({ "raw": String::from_utf8_lossy(payload) }),
            });
        }

        (self.handler)(topic, payload, decoded.as_ref());
    }
}

impl TransportSink for ClientShared {
    fn connected(&self) {
        let mut status = self.status();
        status.state = ClientState::Connected;
        status.last_error = None;
    }

    fn connect_failed(&self, err: TransportError) {
        let mut status = self.status();
        status.state = ClientState::Error;
        status.last_error = Some(err.to_string());
    }

    fn message(&self, topic: &str, payload: &[u8]) {
        self.dispatch(topic, payload);
    }

    fn disconnected(&self, error: Option<String>) {
        let mut status = self.status();
        match error {
            None => status.state = ClientState::Disconnected,
            Some(reason) => {
                status.state = ClientState::Error;
                status.last_error = Some(reason);
            }
        }
    }
}

/// MQTT subscriber with an explicit connect/disconnect lifecycle.
pub struct TelemetrySubscriber {
    transport: MqttTransport,
    shared: Arc<ClientShared>,
    settle: Duration,
}

impl TelemetrySubscriber {
    /// Create a subscriber; `handler` is invoked for every inbound message.
    pub fn new(config: BrokerConfig, handler: MessageHandler) -> Self {
        let shared = Arc::new(ClientShared {
            status: Mutex::new(ConnectionStatus::new(config.topic.clone())),
            last_message: Mutex::new(None),
            handler,
        });
        Self {
            transport: MqttTransport::new(config),
            shared,
            settle: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    /// Adjust the bounded wait [`connect`](Self::connect) gives the
    /// handshake.
    pub fn set_settle_timeout(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// Connect to the broker, wait a bounded interval for the handshake,
    /// and return final connectedness.
    ///
    /// The handshake keeps running after a `false` return; callers that
    /// need certainty poll [`is_connected`](Self::is_connected) instead.
    /// Failures surface through the return value and
    /// [`status`](Self::status), never as a hard fault.
    pub fn connect(&mut self) -> bool {
        // Drop any stale session before re-entering the state machine.
        self.transport.disconnect();
        {
            let mut status = self.shared.status();
            status.state = ClientState::Connecting;
            status.last_error = None;
        }

        let sink: Arc<dyn TransportSink> = self.shared.clone();
        if let Err(e) = self.transport.connect(sink) {
            warn!("connect failed: {}", e);
            let mut status = self.shared.status();
            status.state = ClientState::Error;
            status.last_error = Some(e.to_string());
            return false;
        }

        thread::sleep(self.settle);
        self.is_connected()
    }

    /// Tear down the session; the client can connect again afterwards.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        let mut status = self.shared.status();
        status.state = ClientState::Disconnected;
        info!("disconnected from topic {:?}", status.topic);
    }

    /// Whether a session is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.status().connected()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.shared.status().state
    }

    /// Consistent snapshot of the connection counters; safe to call
    /// concurrently with message delivery.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status().clone()
    }

    /// The most recently delivered message: its decoded JSON value, or a
    /// `{"raw": ...}` wrapper when decoding failed.
    pub fn last_message(&self) -> Option<Value> {
        self.shared
            .last_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
