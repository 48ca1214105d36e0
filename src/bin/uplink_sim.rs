//! Uplink Simulator
//!
//! Publishes TTN-style uplink messages to an MQTT broker so the bridge
//! can be exercised against a local broker (e.g. mosquitto) without
//! hardware or a TTN account.
//!
//! Usage: cargo run --bin uplink-sim [broker_host:port] [app_id]

use std::env;
use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use serde_json::json;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;
use tokio::time::sleep;

const DEFAULT_APP_ID: &str = "htb-iot-monitoring-dht";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let broker = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1883".to_string());
    let app_id = env::args()
        .nth(2)
        .unwrap_or_else(|| DEFAULT_APP_ID.to_string());

    let (host, port) = broker
        .rsplit_once(':')
        .context("broker must be host:port")?;
    let port: u16 = port.parse().context("invalid broker port")?;

    println!("🌡️  TTN Uplink Simulator");
    println!("  Broker: {}", broker);
    println!("  Application: {}", app_id);
    println!();

    let mut options = MqttOptions::new("uplink-sim", host, port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    // Drive the connection in the background
    let driver = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    println!("   ❌ Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let scenarios = vec![
        ("Living room sensor", build_uplink(&app_id, "d1", 1, Some((21.5, 55.0)))),
        ("Garden sensor (cold night)", build_uplink(&app_id, "garden-01", 17, Some((-3.5, 91.2)))),
        ("Living room sensor, next frame", build_uplink(&app_id, "d1", 2, Some((21.7, 54.0)))),
        ("Sensor without DHT readings", build_uplink(&app_id, "battery-only", 5, None)),
    ];

    for (desc, (dev_id, message)) in &scenarios {
        let topic = format!("{}/devices/{}/up", app_id, dev_id);

        println!("📡 Publishing: {}", desc);
        println!("   Topic: {}", topic);
        println!("   Payload: {}", message);

        client
            .publish(topic, QoS::AtLeastOnce, false, message.to_string())
            .await?;
        println!();

        sleep(Duration::from_secs(2)).await;
    }

    client.disconnect().await?;
    let outcome = tokio::time::timeout(Duration::from_secs(2), driver).await;
    println!("{}", describe_driver_exit(outcome));

    println!("✨ Simulation complete!");
    Ok(())
}

/// Build a v2 uplink message as the TTN handler would publish it
fn build_uplink(
    app_id: &str,
    dev_id: &str,
    counter: u32,
    dht: Option<(f64, f64)>,
) -> (String, serde_json::Value) {
    let payload_fields = match dht {
        Some((temperature, humidity)) => json!({
            "dht": { "temperature": temperature, "humidity": humidity }
        }),
        None => json!({ "battery": 3.3 }),
    };

    let message = json!({
        "app_id": app_id,
        "dev_id": dev_id,
        "hardware_serial": "0004A30B001C0530",
        "port": 1,
        "counter": counter,
        "payload_fields": payload_fields,
        "metadata": { "time": chrono::Utc::now().to_rfc3339() },
    });

    (dev_id.to_string(), message)
}

/// How the background connection driver finished
fn describe_driver_exit(outcome: Result<Result<(), JoinError>, Elapsed>) -> String {
    match outcome {
        Ok(Ok(())) => "   🔌 Connection closed".to_string(),
        Ok(Err(e)) if e.is_panic() => format!("   ❌ Connection driver panicked: {}", e),
        Ok(Err(e)) => format!("   ❌ Connection driver failed: {}", e),
        Err(_) => "   ⏰ Connection did not close in time".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_driver_panic_is_reported() {
        let driver = tokio::spawn(async { panic!("event loop exploded") });
        let outcome = tokio::time::timeout(Duration::from_secs(2), driver).await;
        assert!(describe_driver_exit(outcome).contains("panicked"));
    }

    #[tokio::test]
    async fn test_driver_timeout_is_reported() {
        let driver = tokio::spawn(std::future::pending::<()>());
        let outcome = tokio::time::timeout(Duration::from_millis(10), driver).await;
        assert!(describe_driver_exit(outcome).contains("did not close"));
    }

    #[tokio::test]
    async fn test_clean_driver_exit() {
        let driver = tokio::spawn(async {});
        let outcome = tokio::time::timeout(Duration::from_secs(2), driver).await;
        assert!(describe_driver_exit(outcome).contains("closed"));
    }

    #[test]
    fn test_uplink_matches_bridge_shape() {
        let (dev_id, message) = build_uplink(DEFAULT_APP_ID, "d1", 1, Some((21.5, 55.0)));
        assert_eq!(dev_id, "d1");
        assert_eq!(message["dev_id"], "d1");
        assert_eq!(message["payload_fields"]["dht"]["temperature"], 21.5);
        assert_eq!(message["payload_fields"]["dht"]["humidity"], 55.0);
    }
}
