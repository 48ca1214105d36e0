//! The Things Network (v2) MQTT data API
//!
//! The application id doubles as the MQTT username and the access key as
//! the password. Uplinks arrive as JSON on `<app_id>/devices/<dev_id>/up`.
//!
//! Reference: <https://www.thethingsnetwork.org/docs/applications/mqtt/api.html>
//!
//! No reconnect: once the connection drops the error is logged and the
//! subscription ends. Restarting the process is left to whoever runs it.

pub mod types;

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubscribeReasonCode,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{Bridge, TimeSeriesStore};
use crate::config::TtnConfig;
use types::UplinkMessage;

/// Topic carrying uplinks from every device of `app_id`
pub fn uplink_topic(app_id: &str) -> String {
    format!("{}/devices/+/up", app_id)
}

pub fn mqtt_options(config: &TtnConfig) -> Result<MqttOptions> {
    let (host, port) = config.broker_addr()?;
    let client_id = format!("ttn-bridge-{}", &Uuid::new_v4().simple().to_string()[..8]);

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_credentials(config.app_id.clone(), config.access_key.clone());
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
    Ok(options)
}

/// An established, subscribed broker connection
pub struct Subscription {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

/// Connect to the broker and subscribe to the application's uplinks.
///
/// Returns once the broker has accepted the connection; any failure up to
/// that point (unreachable host, refused credentials) is an error.
pub async fn connect(config: &TtnConfig) -> Result<Subscription> {
    let options = mqtt_options(config)?;
    info!(
        "Connecting to {} as application {}...",
        config.broker, config.app_id
    );

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    loop {
        let event = eventloop
            .poll()
            .await
            .with_context(|| format!("failed to connect to broker {}", config.broker))?;

        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    anyhow::bail!("broker {} refused connection: {:?}", config.broker, ack.code);
                }
                break;
            }
            other => debug!("MQTT event before CONNACK: {:?}", other),
        }
    }

    let topic = uplink_topic(&config.app_id);
    client
        .subscribe(topic.as_str(), QoS::AtMostOnce)
        .await
        .context("failed to queue subscribe request")?;

    info!("Connected to {}, subscribing to {}", config.broker, topic);
    Ok(Subscription {
        client,
        eventloop,
        topic,
    })
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Dispatch uplinks to `bridge` until `shutdown` resolves or the
    /// connection drops. Only a rejected subscription is an error.
    pub async fn run<S, F>(mut self, bridge: &Bridge<S>, shutdown: F) -> Result<()>
    where
        S: TimeSeriesStore + 'static,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.disconnect().await;
                    return Ok(());
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event, bridge)?,
                        Err(e) => {
                            error!("Connection to broker lost, ingestion stopped: {}", e);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_event<S>(&self, event: Event, bridge: &Bridge<S>) -> Result<()>
    where
        S: TimeSeriesStore + 'static,
    {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                dispatch(&publish, bridge);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure))
                {
                    anyhow::bail!("broker rejected subscription to {}", self.topic);
                }
                info!("Subscribed to {}", self.topic);
            }
            other => debug!("MQTT event: {:?}", other),
        }
        Ok(())
    }

    /// Send DISCONNECT and give the event loop a moment to flush it
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request failed (non-critical): {}", e);
            return;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        match tokio::time::timeout(Duration::from_secs(2), flush).await {
            Ok(()) => info!("Disconnected from broker"),
            Err(_) => debug!("Timed out flushing DISCONNECT"),
        }
    }
}

fn dispatch<S>(publish: &Publish, bridge: &Bridge<S>)
where
    S: TimeSeriesStore + 'static,
{
    if !publish.topic.ends_with("/up") {
        debug!("Ignoring message on {}", publish.topic);
        return;
    }

    match serde_json::from_slice::<UplinkMessage>(&publish.payload) {
        Ok(msg) => {
            bridge.handle_uplink(msg);
        }
        Err(e) => {
            warn!("Failed to parse uplink on {}: {}", publish.topic, e);
            debug!("  Raw payload: {}", String::from_utf8_lossy(&publish.payload));
        }
    }
}
