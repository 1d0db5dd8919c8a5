use std::fmt;

/// Immutable identity of this device and the broker it talks to.
///
/// Supplied once at startup and shared read-only with every activity.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    device_name: String,
    device_id: String,
    api_key: String,
    host: String,
    port: u16,
}

impl Credentials {
    pub fn new(
        device_name: impl Into<String>,
        device_id: impl Into<String>,
        api_key: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            device_id: device_id.into(),
            api_key: api_key.into(),
            host: host.into(),
            port,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` of the broker.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// The API key never ends up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("device_name", &self.device_name)
            .field("device_id", &self.device_id)
            .field("api_key", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
