//! Uplink → time-series glue
//!
//! The handler never waits on the sink: each uplink's points are written
//! from a spawned task, and a failed write is only logged.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use influxdb::{Timestamp, WriteQuery};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ttn::types::{UplinkMessage, UplinkRecord};

/// Tag carrying the TTN device id on every point
pub const DEVICE_TAG: &str = "deviceId";

/// Field holding the reading on every point
pub const VALUE_FIELD: &str = "value";

/// Where the bridge sends its points
pub trait TimeSeriesStore: Send + Sync {
    fn database_names(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn create_database(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    fn write_points(&self, points: Vec<WriteQuery>) -> impl Future<Output = Result<()>> + Send;
}

/// Create `database` unless the store already has it.
///
/// Returns whether a creation call was issued. Not atomic: a concurrent
/// creator between the two calls is not accounted for.
pub async fn ensure_database<S: TimeSeriesStore>(store: &S, database: &str) -> Result<bool> {
    let names = store.database_names().await?;
    if names.iter().any(|n| n == database) {
        info!("Database {} already exists", database);
        return Ok(false);
    }

    info!("Database {} not found, creating it", database);
    store.create_database(database).await?;
    Ok(true)
}

/// The points written for one uplink: temperature then humidity,
/// stamped with the time the bridge received it
pub fn uplink_points(record: &UplinkRecord, received_at: DateTime<Utc>) -> Result<Vec<WriteQuery>> {
    record.check_device_id()?;
    let dht = record.dht()?;
    let time = Timestamp::Milliseconds(u128::try_from(received_at.timestamp_millis())?);

    Ok(vec![
        WriteQuery::new(time, "temperature")
            .add_tag(DEVICE_TAG, record.device_id.as_str())
            .add_field(VALUE_FIELD, dht.temperature),
        WriteQuery::new(time, "humidity")
            .add_tag(DEVICE_TAG, record.device_id.as_str())
            .add_field(VALUE_FIELD, dht.humidity),
    ])
}

pub struct Bridge<S> {
    store: Arc<S>,
}

impl<S> Clone for Bridge<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TimeSeriesStore + 'static> Bridge<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Log the uplink and fire off its writes.
    ///
    /// Returns the handle of the spawned write, or `None` when the uplink
    /// carried no usable readings and nothing was written.
    pub fn handle_uplink(&self, msg: UplinkMessage) -> Option<JoinHandle<()>> {
        debug!(
            "Uplink metadata: app={} serial={:?} port={:?} counter={:?} raw={:?} time={:?}",
            msg.app_id,
            msg.hardware_serial,
            msg.port,
            msg.counter,
            msg.payload_raw,
            msg.metadata.as_ref().and_then(|m| m.time)
        );

        let record = UplinkRecord::from(msg);
        match serde_json::to_string(&record) {
            Ok(json) => info!("Uplink {}", json),
            Err(e) => warn!("Uplink from {} could not be logged: {}", record.device_id, e),
        }

        let points = match uplink_points(&record, Utc::now()) {
            Ok(points) => points,
            Err(e) => {
                warn!("Skipping uplink: {}", e);
                return None;
            }
        };

        let store = Arc::clone(&self.store);
        let device_id = record.device_id;
        Some(tokio::spawn(async move {
            if let Err(e) = store.write_points(points).await {
                error!("Error writing data from {} to InfluxDB: {:#}", device_id, e);
            }
        }))
    }
}
