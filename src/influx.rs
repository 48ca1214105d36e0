//! InfluxDB 1.x sink
//!
//! Wraps `influxdb::Client` for the three things the bridge needs:
//! listing databases, creating one, and writing a batch of points.
//! Credentials travel as the `u`/`p` query parameters of the 1.x API.

use anyhow::{Context, Result};
use influxdb::{Client, ReadQuery, WriteQuery};
use serde::Deserialize;
use tracing::{debug, info};

use crate::bridge::TimeSeriesStore;
use crate::config::InfluxConfig;

/// Body of a `SHOW DATABASES` response
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

pub struct InfluxClient {
    config: InfluxConfig,
    client: Client,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig) -> Self {
        let client = Client::new(config.url.as_str(), config.database.as_str())
            .with_auth(config.username.as_str(), config.password.as_str());

        info!(
            "InfluxDB client created for database {} at {}",
            config.database, config.url
        );

        Self { config, client }
    }

    /// Check the server is reachable
    pub async fn ping(&self) -> Result<()> {
        let (build, version) = self
            .client
            .ping()
            .await
            .with_context(|| format!("failed to ping InfluxDB at {}", self.config.url))?;

        info!("InfluxDB {} ({}) at {}", version, build, self.config.url);
        Ok(())
    }

    /// List the names of all databases on the server
    pub async fn database_names(&self) -> Result<Vec<String>> {
        let raw = self
            .client
            .query(ReadQuery::new("SHOW DATABASES"))
            .await
            .context("failed to list databases")?;

        let body: QueryResponse =
            serde_json::from_str(&raw).context("failed to decode SHOW DATABASES response")?;

        let names = body
            .results
            .into_iter()
            .flat_map(|r| r.series)
            .flat_map(|s| s.values)
            .filter_map(|row| row.into_iter().next())
            .collect();

        Ok(names)
    }

    pub async fn create_database(&self, name: &str) -> Result<()> {
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        self.client
            .query(ReadQuery::new(statement))
            .await
            .with_context(|| format!("failed to create database {}", name))?;

        info!("Created database {}", name);
        Ok(())
    }

    /// Write points to the configured database in a single request
    pub async fn write_points(&self, points: Vec<WriteQuery>) -> Result<()> {
        let count = points.len();
        self.client
            .query(points)
            .await
            .context("failed to write points")?;

        debug!("Wrote {} point(s) to {}", count, self.config.database);
        Ok(())
    }
}

impl TimeSeriesStore for InfluxClient {
    async fn database_names(&self) -> Result<Vec<String>> {
        InfluxClient::database_names(self).await
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        InfluxClient::create_database(self, name).await
    }

    async fn write_points(&self, points: Vec<WriteQuery>) -> Result<()> {
        InfluxClient::write_points(self, points).await
    }
}
