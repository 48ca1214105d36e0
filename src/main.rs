mod bridge;
mod config;
mod influx;
mod ttn;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bridge::{Bridge, TimeSeriesStore};

#[derive(Parser)]
#[command(name = "ttn-bridge")]
#[command(about = "Forward The Things Network DHT uplinks into InfluxDB")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        config::Config::default()
    });

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("TTN Bridge v{} started.", env!("CARGO_PKG_VERSION"));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down...");
    };

    if let Err(e) = run(&config, shutdown).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run<F>(config: &config::Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let influx = influx::InfluxClient::new(config.influx.clone());
    influx.ping().await?;

    serve(config, Arc::new(influx), shutdown).await
}

/// Bootstrap the database, subscribe, and forward uplinks until shutdown
async fn serve<S, F>(config: &config::Config, store: Arc<S>, shutdown: F) -> anyhow::Result<()>
where
    S: TimeSeriesStore + 'static,
    F: Future<Output = ()>,
{
    bridge::ensure_database(store.as_ref(), &config.influx.database)
        .await
        .with_context(|| format!("failed to bootstrap database {}", config.influx.database))?;

    let subscription = ttn::connect(&config.ttn).await?;

    info!(
        "Bridge running on {}. Press Ctrl+C to stop.",
        subscription.topic()
    );
    subscription.run(&Bridge::new(store), shutdown).await?;
    info!("Bridge stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tests::RecordingStore;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_broker_failure_at_startup_writes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut config = config::Config::default();
        config.ttn.broker = addr;
        let store = Arc::new(RecordingStore::with_databases(&["iot-monitoring"]));

        let result = serve(&config, Arc::clone(&store), std::future::pending()).await;
        assert!(result.is_err());
        assert!(store.writes.lock().unwrap().is_empty());
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_happens_before_broker_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut config = config::Config::default();
        config.ttn.broker = addr;
        let store = Arc::new(RecordingStore::default());

        assert!(serve(&config, Arc::clone(&store), std::future::pending())
            .await
            .is_err());
        assert_eq!(*store.created.lock().unwrap(), vec!["iot-monitoring"]);
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_influx_is_a_startup_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = config::Config::default();
        config.influx.url = url;

        assert!(run(&config, std::future::pending()).await.is_err());
    }
}
