//! Broker transport: owns the MQTT session and its receive loop.
//!
//! `connect` spawns a background thread that drives the broker session,
//! issues the QoS 1 subscription as soon as the broker acknowledges the
//! connection, and forwards every event to a single registered
//! [`TransportSink`]. The adapter performs no reconnection of its own:
//! the receive loop ends on the first session error and reports it
//! through the sink; reconnect policy belongs to the caller.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS};

/// How long `disconnect` waits for the receive loop to wind down before
/// detaching it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier, unique per process instance
    pub client_id: String,
    /// Topic to subscribe to
    pub topic: String,
    /// Username (optional)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
}

impl BrokerConfig {
    /// Configuration for a local Mosquitto broker.
    pub fn local(topic: &str) -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: unique_client_id(),
            topic: topic.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Generate a client id no other subscriber in this process shares.
///
/// Brokers drop the older of two sessions with the same id, so the id
/// embeds the process id and an in-process counter.
fn unique_client_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "edge-telemetry-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Receiver for transport events.
///
/// Methods run on the transport's receive-loop thread; a slow
/// implementation delays subsequent message delivery.
pub trait TransportSink: Send + Sync + 'static {
    /// Session established; the subscription has been issued.
    fn connected(&self);
    /// The broker handshake failed; the receive loop has stopped.
    fn connect_failed(&self, err: TransportError);
    /// One inbound message, in broker delivery order.
    fn message(&self, topic: &str, payload: &[u8]);
    /// Session ended. `error` is `None` for a caller-initiated teardown.
    fn disconnected(&self, error: Option<String>);
}

/// Transport errors: one category per broker CONNACK reason, plus the
/// socket-level and subscribe failure paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Broker rejected the protocol version
    ProtocolVersion,
    /// Broker rejected the client identifier
    InvalidClientId,
    /// Broker refused service
    ServiceUnavailable,
    /// Bad user name or password
    BadCredentials,
    /// Client is not authorized
    NotAuthorized,
    /// Broker unreachable at the socket level
    Unreachable(String),
    /// The subscribe request could not be issued
    Subscribe(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ProtocolVersion => write!(f, "broker rejected the protocol version"),
            TransportError::InvalidClientId => write!(f, "broker rejected the client identifier"),
            TransportError::ServiceUnavailable => write!(f, "broker service unavailable"),
            TransportError::BadCredentials => write!(f, "bad user name or password"),
            TransportError::NotAuthorized => write!(f, "client not authorized"),
            TransportError::Unreachable(e) => write!(f, "broker unreachable: {}", e),
            TransportError::Subscribe(e) => write!(f, "subscribe failed: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

fn map_return_code(code: ConnectReturnCode) -> TransportError {
    match code {
        ConnectReturnCode::RefusedProtocolVersion => TransportError::ProtocolVersion,
        ConnectReturnCode::BadClientId => TransportError::InvalidClientId,
        ConnectReturnCode::ServiceUnavailable => TransportError::ServiceUnavailable,
        ConnectReturnCode::BadUserNamePassword => TransportError::BadCredentials,
        // Success never reaches the mapping; the receive loop handles it.
        _ => TransportError::NotAuthorized,
    }
}

/// Transport adapter owning the broker session.
pub struct MqttTransport {
    config: BrokerConfig,
    client: Option<Client>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create a transport for the given broker; no connection is made yet.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            client: None,
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Broker settings this transport was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Whether the receive loop is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start a session and its receive loop.
    ///
    /// Tears down any previous session first. Returns once the loop is
    /// launched; the handshake outcome arrives through `sink`. On CONNACK
    /// success the transport issues the QoS 1 subscribe itself, so the
    /// caller never has to.
    pub fn connect(&mut self, sink: Arc<dyn TransportSink>) -> Result<(), TransportError> {
        self.disconnect();

        if self.config.client_id.is_empty() {
            return Err(TransportError::InvalidClientId);
        }

        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.host,
            self.config.port,
        );
        // rumqttc rejects sub-second keep-alive intervals.
        options.set_keep_alive(self.config.keep_alive.max(Duration::from_secs(1)));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, connection) = Client::new(options, 64);
        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let broker = format!("{}:{}", self.config.host, self.config.port);
        info!("connecting to {} as {}", broker, self.config.client_id);

        let topic = self.config.topic.clone();
        let loop_client = client.clone();
        let worker = thread::spawn(move || {
            receive_loop(connection, loop_client, sink, running, &topic, &broker);
        });

        self.client = Some(client);
        self.worker = Some(worker);
        Ok(())
    }

    /// Re-issue the subscription; safe to call repeatedly.
    pub fn subscribe(&self) -> Result<(), TransportError> {
        match &self.client {
            Some(client) => client
                .subscribe(&self.config.topic, QoS::AtLeastOnce)
                .map_err(|e| TransportError::Subscribe(e.to_string())),
            None => Err(TransportError::Subscribe("no active session".into())),
        }
    }

    /// Tear down the session and stop the receive loop.
    ///
    /// Safe to call when never connected and idempotent. Waits at most
    /// [`TEARDOWN_TIMEOUT`] for the loop to exit, then detaches it.
    pub fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + TEARDOWN_TIMEOUT;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                warn!(
                    "receive loop did not stop within {:?}, detaching it",
                    TEARDOWN_TIMEOUT
                );
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Drive the broker session until it ends or the owner asks to stop.
fn receive_loop(
    mut connection: Connection,
    client: Client,
    sink: Arc<dyn TransportSink>,
    running: Arc<AtomicBool>,
    topic: &str,
    broker: &str,
) {
    let mut session_up = false;
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => match ack.code {
                ConnectReturnCode::Success => {
                    match client.subscribe(topic, QoS::AtLeastOnce) {
                        Ok(()) => {
                            info!("connected to {}, subscribing to {:?} at QoS 1", broker, topic);
                            session_up = true;
                            sink.connected();
                        }
                        Err(e) => {
                            sink.connect_failed(TransportError::Subscribe(e.to_string()));
                            break;
                        }
                    }
                }
                code => {
                    let err = map_return_code(code);
                    warn!("{} refused connection: {}", broker, err);
                    sink.connect_failed(err);
                    break;
                }
            },
            Ok(Event::Incoming(Packet::SubAck(_))) => debug!("subscription acknowledged"),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                sink.message(&publish.topic, publish.payload.as_ref());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("{} closed the session", broker);
                sink.disconnected(Some("broker closed the session".into()));
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("session to {} closed", broker);
                sink.disconnected(None);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    sink.disconnected(None);
                } else if session_up {
                    warn!("session to {} lost: {}", broker, e);
                    sink.disconnected(Some(e.to_string()));
                } else {
                    warn!("could not reach {}: {}", broker, e);
                    sink.connect_failed(TransportError::Unreachable(e.to_string()));
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }
    }

    impl TransportSink for RecordingSink {
        fn connected(&self) {
            self.push("connected");
        }
        fn connect_failed(&self, err: TransportError) {
            self.push(format!("connect_failed: {}", err));
        }
        fn message(&self, topic: &str, _payload: &[u8]) {
            self.push(format!("message: {}", topic));
        }
        fn disconnected(&self, error: Option<String>) {
            self.push(format!("disconnected: {:?}", error));
        }
    }

    #[test]
    fn test_local_config_defaults() {
        let config = BrokerConfig::local("living-room");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic, "living-room");
        assert!(config.username.is_none());
        assert_eq!(config.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = BrokerConfig::local("t").client_id;
        let b = BrokerConfig::local("t").client_id;
        assert_ne!(a, b);
        assert!(a.starts_with("edge-telemetry-"));
    }

    #[test]
    fn test_return_code_mapping_is_distinct() {
        let mapped = [
            map_return_code(ConnectReturnCode::RefusedProtocolVersion),
            map_return_code(ConnectReturnCode::BadClientId),
            map_return_code(ConnectReturnCode::ServiceUnavailable),
            map_return_code(ConnectReturnCode::BadUserNamePassword),
            map_return_code(ConnectReturnCode::NotAuthorized),
        ];
        assert_eq!(mapped[0], TransportError::ProtocolVersion);
        assert_eq!(mapped[1], TransportError::InvalidClientId);
        assert_eq!(mapped[2], TransportError::ServiceUnavailable);
        assert_eq!(mapped[3], TransportError::BadCredentials);
        assert_eq!(mapped[4], TransportError::NotAuthorized);
        for (i, a) in mapped.iter().enumerate() {
            for b in &mapped[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            TransportError::Unreachable("connection refused".into()).to_string(),
            "broker unreachable: connection refused"
        );
        assert_eq!(
            TransportError::BadCredentials.to_string(),
            "bad user name or password"
        );
    }

    #[test]
    fn test_disconnect_without_connect() {
        let mut transport = MqttTransport::new(BrokerConfig::local("t"));
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_running());
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let mut config = BrokerConfig::local("t");
        config.client_id.clear();
        let mut transport = MqttTransport::new(config);
        let sink = Arc::new(RecordingSink::default());
        assert_eq!(
            transport.connect(sink),
            Err(TransportError::InvalidClientId)
        );
    }

    #[test]
    fn test_subscribe_without_session() {
        let transport = MqttTransport::new(BrokerConfig::local("t"));
        assert!(matches!(
            transport.subscribe(),
            Err(TransportError::Subscribe(_))
        ));
    }

    #[test]
    fn test_unreachable_broker_reports_connect_failed() {
        let mut config = BrokerConfig::local("t");
        config.host = "127.0.0.1".into();
        config.port = 1; // nothing listens here
        let mut transport = MqttTransport::new(config);
        let sink = Arc::new(RecordingSink::default());
        transport.connect(sink.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.events().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }

        let events = sink.events();
        assert!(
            events.iter().any(|e| e.starts_with("connect_failed")),
            "expected a connect failure, got {:?}",
            events
        );
        transport.disconnect();
    }
}
