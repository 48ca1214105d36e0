use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub ttn: TtnConfig,
    pub influx: InfluxConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtnConfig {
    pub app_id: String,
    pub access_key: String,
    /// Broker address as `host:port`
    pub broker: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }
}

impl TtnConfig {
    /// Split `broker` into host and port
    pub fn broker_addr(&self) -> anyhow::Result<(String, u16)> {
        let (host, port) = self
            .broker
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("broker {:?} is not host:port", self.broker))?;
        if host.is_empty() {
            anyhow::bail!("broker {:?} has an empty host", self.broker);
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| anyhow::anyhow!("broker {:?} has an invalid port: {}", self.broker, e))?;
        Ok((host.to_string(), port))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttn: TtnConfig {
                app_id: "htb-iot-monitoring-dht".to_string(),
                access_key: "your_access_key".to_string(),
                broker: "eu.thethings.network:1883".to_string(),
                keep_alive_secs: default_keep_alive_secs(),
            },
            influx: InfluxConfig {
                url: "http://influxdb:8086".to_string(),
                database: "iot-monitoring".to_string(),
                username: "root".to_string(),
                password: "root".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            [ttn]
            app_id = "my-app"
            access_key = "ttn-account-v2.secret"
            broker = "localhost:1883"

            [influx]
            url = "http://localhost:8086"
            database = "sensors"
            username = "admin"
            password = "admin"

            [logging]
            level = "debug"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.ttn.app_id, "my-app");
        assert_eq!(config.ttn.keep_alive_secs, 30);
        assert_eq!(config.influx.database, "sensors");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_matches_lab_setup() {
        let config = Config::default();
        assert_eq!(config.ttn.app_id, "htb-iot-monitoring-dht");
        assert_eq!(config.influx.database, "iot-monitoring");
        assert_eq!(
            config.ttn.broker_addr().unwrap(),
            ("eu.thethings.network".to_string(), 1883)
        );
    }

    #[test]
    fn test_broker_addr_rejects_garbage() {
        let mut ttn = Config::default().ttn;
        ttn.broker = "no-port".to_string();
        assert!(ttn.broker_addr().is_err());

        ttn.broker = "host:notaport".to_string();
        assert!(ttn.broker_addr().is_err());

        ttn.broker = ":1883".to_string();
        assert!(ttn.broker_addr().is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.ttn.broker_addr().unwrap().1, 1883);
        assert_eq!(config.influx.url, "http://influxdb:8086");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/ttn-bridge.toml")).is_err());
    }
}
