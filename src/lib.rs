//! Environmental telemetry over MQTT: subscribe, normalize, persist, serve.
//!
//! The crate owns the subscriber side of a small telemetry pipeline. A
//! broker transport drives a background receive loop; the subscriber
//! client tracks the connection lifecycle and hands every message to a
//! handler injected at construction; the parser normalizes payloads into
//! [`Reading`] records; and the store appends them to a CSV-backed log
//! serving the read views a dashboard polls: latest snapshot, recent
//! window, chart series.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use edge_telemetry::{parse, BrokerConfig, Payload, ReadingStore, TelemetrySubscriber};
//!
//! let store = Arc::new(ReadingStore::open("data/telemetry.csv"));
//!
//! let sink = store.clone();
//! let mut client = TelemetrySubscriber::new(
//!     BrokerConfig::local("living-room"),
//!     Box::new(move |_topic, payload, decoded| {
//!         let parsed = match decoded {
//!             Some(value) => parse(Payload::Decoded(value)),
//!             None => parse(Payload::Raw(payload)),
//!         };
//!         if let Some(reading) = parsed {
//!             if let Err(e) = sink.append(reading) {
//!                 log::warn!("could not persist reading: {}", e);
//!             }
//!         }
//!     }),
//! );
//!
//! if client.connect() {
//!     println!("latest: {:?}", store.latest());
//! }
//! client.disconnect();
//! ```

pub mod parser;
pub mod reading;
pub mod store;
pub mod subscriber;
pub mod transport;

pub use parser::{parse, Payload};
pub use reading::Reading;
pub use store::{ChartPoint, ReadingStore, StoreError};
pub use subscriber::{
    ClientState, ConnectionStatus, MessageHandler, TelemetrySubscriber, DEFAULT_SETTLE_TIMEOUT,
};
pub use transport::{BrokerConfig, MqttTransport, TransportError, TransportSink};
