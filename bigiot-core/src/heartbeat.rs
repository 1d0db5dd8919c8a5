//! Keep-alive sender.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::message::ProtocolMessage;
use crate::network::SessionLink;
use crate::task::PeriodicAction;

/// Interval between two keep-alive lines.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);

/// Sends `{"M":"beat"}` on every tick while the session is authenticated.
///
/// A failed send is logged and otherwise ignored; connection loss is
/// detected by the read loop.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    link: SessionLink,
}

impl Heartbeat {
    pub fn new(link: SessionLink) -> Self {
        Self { link }
    }
}

#[async_trait]
impl PeriodicAction for Heartbeat {
    async fn fire(&mut self) {
        if let Err(e) = self.link.send_message(&ProtocolMessage::Heartbeat).await {
            warn!("heartbeat send failed: {e}");
        }
    }
}
