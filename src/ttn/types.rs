//! Types for TTN v2 uplink messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest device id TTN accepts
const MAX_DEVICE_ID_LEN: usize = 36;

/// An uplink as published on `<app_id>/devices/<dev_id>/up`
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkMessage {
    #[serde(default)]
    pub app_id: String,
    pub dev_id: String,
    pub hardware_serial: Option<String>,
    pub port: Option<u8>,
    pub counter: Option<u32>,
    /// Raw FRMPayload (base64 encoded)
    pub payload_raw: Option<String>,
    /// Output of the application's payload decoder
    #[serde(default)]
    pub payload_fields: serde_json::Map<String, serde_json::Value>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    /// Time the network server received the uplink
    pub time: Option<DateTime<Utc>>,
}

/// The transient record handed from subscription to sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkRecord {
    pub device_id: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Readings from a DHT temperature/humidity sensor
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DhtReading {
    pub temperature: f64,
    pub humidity: f64,
}

impl From<UplinkMessage> for UplinkRecord {
    fn from(msg: UplinkMessage) -> Self {
        Self {
            device_id: msg.dev_id,
            payload: msg.payload_fields,
        }
    }
}

impl UplinkRecord {
    /// Reject ids TTN would never issue.
    ///
    /// TTN ids are 2-36 lowercase alphanumerics, optionally separated by
    /// single `-` or `_`. Anything else cannot be written safely as a tag.
    pub fn check_device_id(&self) -> anyhow::Result<()> {
        let id = self.device_id.as_str();
        let mut prev_separator = true;
        let well_formed = (2..=MAX_DEVICE_ID_LEN).contains(&id.len())
            && id.chars().all(|c| {
                let separator = c == '-' || c == '_';
                let ok = (c.is_ascii_lowercase() || c.is_ascii_digit())
                    || (separator && !prev_separator);
                prev_separator = separator;
                ok
            })
            && !prev_separator;

        if !well_formed {
            anyhow::bail!("invalid device id {:?}", id);
        }
        Ok(())
    }

    /// Extract the `dht` readings from the payload
    pub fn dht(&self) -> anyhow::Result<DhtReading> {
        let dht = self
            .payload
            .get("dht")
            .ok_or_else(|| anyhow::anyhow!("payload from {} has no dht field", self.device_id))?;
        serde_json::from_value(dht.clone())
            .map_err(|e| anyhow::anyhow!("invalid dht payload from {}: {}", self.device_id, e))
    }
}
