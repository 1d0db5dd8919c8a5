//! Periodic data-point uploads.
//!
//! Each tick samples one [`DataSource`] and sends the reading as an
//! `update` message. No acknowledgement is expected.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::message::ProtocolMessage;
use crate::network::SessionLink;
use crate::task::PeriodicAction;

/// Interval between two uploads.
pub const DEFAULT_TELEMETRY_PERIOD: Duration = Duration::from_secs(5);

/// Something that produces one 16-bit reading on demand.
pub trait DataSource: Send + 'static {
    /// Take a reading. `None` skips this period's upload.
    fn sample(&mut self) -> Option<u16>;
}

/// A named data point and the source that feeds it.
///
/// Clones share the same source, so a reading sequence continues across
/// reconnects.
pub struct DataPoint<S> {
    id: String,
    source: Arc<Mutex<S>>,
}

impl<S: DataSource> DataPoint<S> {
    pub fn new(id: impl Into<String>, source: S) -> Self {
        Self {
            id: id.into(),
            source: Arc::new(Mutex::new(source)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sample(&self) -> Option<u16> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample()
    }
}

impl<S> Clone for DataPoint<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            source: Arc::clone(&self.source),
        }
    }
}

impl<S> fmt::Debug for DataPoint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPoint").field("id", &self.id).finish()
    }
}

/// Uploads one reading per tick while the session is authenticated.
#[derive(Debug)]
pub struct TelemetryPublisher<S> {
    link: SessionLink,
    device_id: String,
    point: DataPoint<S>,
}

impl<S: DataSource> TelemetryPublisher<S> {
    pub fn new(link: SessionLink, device_id: impl Into<String>, point: DataPoint<S>) -> Self {
        Self {
            link,
            device_id: device_id.into(),
            point,
        }
    }

    /// The `update` message carrying `value`.
    pub fn update(&self, value: u16) -> ProtocolMessage {
        ProtocolMessage::Update {
            device_id: self.device_id.clone(),
            data_point_id: self.point.id().to_string(),
            value: value.to_string(),
        }
    }
}

#[async_trait]
impl<S: DataSource> PeriodicAction for TelemetryPublisher<S> {
    async fn fire(&mut self) {
        let Some(value) = self.point.sample() else {
            debug!(point = self.point.id(), "no reading this period");
            return;
        };
        let msg = self.update(value);
        if let Err(e) = self.link.send_message(&msg).await {
            warn!(point = self.point.id(), "telemetry send failed: {e}");
        }
    }
}
