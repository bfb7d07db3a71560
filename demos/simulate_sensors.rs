//! Simulated telemetry publisher: exercise a local broker without hardware.
//!
//! Publishes one JSON reading per interval with a day-curve temperature
//! and humidity, deterministic pseudo-random noise, and a time-of-day
//! light state.
//!
//! Prerequisites:
//!   sudo apt install mosquitto
//!   sudo systemctl start mosquitto
//!
//! Watch the stream:
//!   mosquitto_sub -t 'living-room' -v
//!
//! ```bash
//! cargo run --example simulate_sensors
//! ```

use std::f64::consts::PI;
use std::time::Duration;

use chrono::{Timelike, Utc};
use rumqttc::{Client, MqttOptions, QoS};

const TOPIC: &str = "living-room";
const INTERVAL: Duration = Duration::from_secs(2);

/// Simple deterministic pseudo-random noise in [-25, 25].
fn noise(seed: u64) -> f64 {
    let hash = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(0x6A09_E667);
    (((hash >> 48) as i32) % 50 - 25) as f64
}

fn main() {
    env_logger::init();

    println!("=== edge-telemetry: simulated sensor publisher ===\n");

    let mut options = MqttOptions::new(
        format!("edge-telemetry-sim-{}", std::process::id()),
        "localhost",
        1883,
    );
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut connection) = Client::new(options, 16);

    std::thread::spawn(move || {
        for event in connection.iter() {
            if let Err(e) = event {
                eprintln!("broker connection lost: {}", e);
                eprintln!("Is Mosquitto running? sudo systemctl start mosquitto");
                std::process::exit(1);
            }
        }
    });

    println!(
        "Publishing to {:?} on localhost:1883 every {:?}\n",
        TOPIC, INTERVAL
    );

    for i in 0u64.. {
        let now = Utc::now();
        let hour = now.hour() as f64 + now.minute() as f64 / 60.0;

        // Day curve: warmest mid-afternoon, most humid overnight.
        let phase = ((hour - 14.0) / 24.0 * 2.0 * PI).cos();
        let temperature = 25.0 + 3.0 * phase + noise(i) / 25.0;
        let humidity = 60.0 - 5.0 * phase + noise(i.wrapping_add(7)) / 10.0;
        let light = if !(6.0..18.0).contains(&hour) { "on" } else { "off" };

        let payload = serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "light": light,
            "temperature": (temperature * 10.0).round() / 10.0,
            "humidity": (humidity * 10.0).round() / 10.0,
        });

        match client.publish(TOPIC, QoS::AtLeastOnce, false, payload.to_string()) {
            Ok(()) => println!("[{}] {}", i + 1, payload),
            Err(e) => {
                eprintln!("publish failed: {}", e);
                break;
            }
        }

        std::thread::sleep(INTERVAL);
    }
}
