//! Configuration for the device agent.

use std::path::{Path, PathBuf};

use bigiot_core::{ClientConfig, Credentials};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a config file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config at {}", .0.display())]
    Missing(PathBuf),

    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where the broker lives.
    pub broker: BrokerConfig,
    /// This device's identity on the broker.
    pub device: DeviceConfig,
    /// Timing of the client engine.
    pub client: ClientConfig,
    /// The reading uploaded as telemetry.
    pub sensor: SensorConfig,
    /// Saved network identity.
    pub identity: IdentityConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Human-readable device name.
    pub name: String,
    /// Device id assigned by the broker.
    pub id: String,
    /// API key paired with `id`.
    pub api_key: String,
    /// Data point the sensor reading is uploaded to.
    pub data_point_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// File holding one integer reading, e.g. a sysfs attribute.
    pub path: PathBuf,
    /// The raw value is divided by this before upload.
    pub divisor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// JSON file with the provisioned SSID and secret.
    pub path: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "www.bigiot.net".into(),
            port: 8282,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "sw00".into(),
            id: String::new(),
            api_key: String::new(),
            data_point_id: String::new(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            divisor: 1000,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bigiot-identity.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file. Fields the file omits keep
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `Some` names the first required device field left empty.
    pub fn missing_device_field(&self) -> Option<&'static str> {
        [
            ("device.id", &self.device.id),
            ("device.api_key", &self.device.api_key),
            ("device.data_point_id", &self.device.data_point_id),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.device.name.as_str(),
            self.device.id.as_str(),
            self.device.api_key.as_str(),
            self.broker.host.as_str(),
            self.broker.port,
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&AgentConfig::default()).unwrap();
        assert!(text.contains("[broker]"));
        assert!(text.contains("heartbeat_period_ms"));
        assert!(text.contains("data_point_id"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&AgentConfig::default()).unwrap();
        let parsed: AgentConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.broker.host, "www.bigiot.net");
        assert_eq!(parsed.broker.port, 8282);
        assert_eq!(parsed.client, ClientConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: AgentConfig = toml::from_str(
            r#"
            [device]
            id = "7720"
            api_key = "k1"
            data_point_id = "6826"

            [client]
            telemetry_period_ms = 10000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.device.name, "sw00");
        assert_eq!(parsed.client.telemetry_period_ms, 10_000);
        assert_eq!(parsed.client.heartbeat_period_ms, 3_000);
        assert_eq!(parsed.missing_device_field(), None);

        let creds = parsed.credentials();
        assert_eq!(creds.device_id(), "7720");
        assert_eq!(creds.endpoint(), "www.bigiot.net:8282");
    }

    #[test]
    fn empty_device_fields_are_reported() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.missing_device_field(), Some("device.id"));
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bigiot-agent-{}-{name}.toml", std::process::id()))
    }

    #[test]
    fn written_default_loads_back() {
        let path = scratch("default");
        std::fs::write(&path, toml::to_string_pretty(&AgentConfig::default()).unwrap()).unwrap();
        let cfg = AgentConfig::load(&path).unwrap();
        assert_eq!(cfg.device.name, "sw00");
        assert_eq!(cfg.sensor.divisor, 1000);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = AgentConfig::load(Path::new("/nonexistent/bigiot-agent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn invalid_file_is_reported_with_its_path() {
        let path = scratch("invalid");
        std::fs::write(&path, "[device\nid = 7720").unwrap();
        let err = AgentConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&*path.to_string_lossy()));
        let _ = std::fs::remove_file(path);
    }
}
