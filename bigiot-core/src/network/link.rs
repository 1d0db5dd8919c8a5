use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::codec;
use crate::error::BigiotError;
use crate::message::ProtocolMessage;
use crate::network::Transport;
use crate::state::SessionState;

/// Outbound path for the steady-state senders.
///
/// Every periodic write goes through [`send_message`](Self::send_message),
/// which refuses to touch the connection unless the session is
/// `Authenticated` at that moment.
#[derive(Debug, Clone)]
pub struct SessionLink {
    transport: Arc<dyn Transport>,
    state: watch::Receiver<SessionState>,
}

impl SessionLink {
    pub fn new(transport: Arc<dyn Transport>, state: watch::Receiver<SessionState>) -> Self {
        Self { transport, state }
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_authenticated() && !self.transport.is_closed()
    }

    /// Encode `msg` and write it as one unit.
    pub async fn send_message(&self, msg: &ProtocolMessage) -> Result<usize, BigiotError> {
        if !self.is_open() {
            return Err(BigiotError::NotAuthenticated);
        }
        let frame = codec::encode(msg)?;
        let written = self.transport.send(&frame).await?;
        trace!(%msg, written, "message sent");
        Ok(written)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
