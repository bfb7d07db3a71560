//! Terminal telemetry monitor: subscribe, store, and render the read views.
//!
//! Wires the full pipeline against a local broker. Every inbound payload
//! is parsed into a reading and appended to the CSV-backed store; once
//! per poll cycle the terminal re-renders the latest snapshot, the recent
//! window, and the chart range.
//!
//! ```bash
//! cargo run --example monitor_local
//! ```
//!
//! Pair with the publisher:
//!   cargo run --example simulate_sensors

use std::sync::Arc;
use std::time::Duration;

use edge_telemetry::{
    parse, BrokerConfig, ConnectionStatus, Payload, ReadingStore, TelemetrySubscriber,
};

const TOPIC: &str = "living-room";
const POLL_INTERVAL: Duration = Duration::from_secs(3);

fn main() {
    env_logger::init();

    println!("=== edge-telemetry: local monitor ===\n");

    let store = Arc::new(ReadingStore::open("data/telemetry.csv"));
    println!(
        "Store: {:?} ({} readings on disk)\n",
        store.path(),
        store.len()
    );

    let sink = store.clone();
    let mut client = TelemetrySubscriber::new(
        BrokerConfig::local(TOPIC),
        Box::new(move |topic, payload, decoded| {
            let parsed = match decoded {
                Some(value) => parse(Payload::Decoded(value)),
                None => parse(Payload::Raw(payload)),
            };
            match parsed {
                Some(reading) => {
                    if let Err(e) = sink.append(reading) {
                        eprintln!("could not persist reading from {:?}: {}", topic, e);
                    }
                }
                None => eprintln!("unparsable payload on {:?}", topic),
            }
        }),
    );

    if !client.connect() {
        let status = client.status();
        eprintln!(
            "could not connect: {}",
            status.last_error.as_deref().unwrap_or("handshake timed out")
        );
        eprintln!("Is Mosquitto running? sudo systemctl start mosquitto");
        return;
    }

    loop {
        std::thread::sleep(POLL_INTERVAL);
        render(&client.status(), &store);
        if !client.is_connected() {
            let status = client.status();
            eprintln!(
                "connection lost: {}",
                status.last_error.as_deref().unwrap_or("session closed")
            );
            break;
        }
    }

    client.disconnect();
}

fn render(status: &ConnectionStatus, store: &ReadingStore) {
    println!("┌──────────────────────────────────────────────────────┐");
    println!(
        "│ {:?} on {:?}  |  {} messages",
        status.state, status.topic, status.messages_received
    );
    match store.latest() {
        Some(reading) => {
            println!(
                "│ Light: {:<8}  Temp: {:>8}  Humidity: {:>8}",
                reading.light,
                format_value(reading.temperature, "°C"),
                format_value(reading.humidity, "%")
            );
            println!(
                "│ Updated: {}",
                reading.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
        None => println!("│ Waiting for data..."),
    }

    let series = store.chart_series();
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        println!(
            "│ Chart: {} points, {} to {}",
            series.len(),
            first.timestamp.format("%H:%M:%S"),
            last.timestamp.format("%H:%M:%S")
        );
    }

    println!("│ Recent:");
    for reading in store.recent(5) {
        println!(
            "│   {}  {:<8} {:>8} {:>8}",
            reading.timestamp.format("%H:%M:%S"),
            reading.light,
            format_value(reading.temperature, "°C"),
            format_value(reading.humidity, "%")
        );
    }
    println!("└──────────────────────────────────────────────────────┘");
}

fn format_value(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "n/a".into(),
    }
}
