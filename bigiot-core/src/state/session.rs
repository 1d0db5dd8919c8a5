//! Session state machine.
//!
//! Provides a `SessionState` enum that models the authentication
//! lifecycle of the device, with validated transitions that return
//! `Result` instead of panicking, and the `Session` that owns the live
//! connection and publishes every state change.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use crate::error::BigiotError;
use crate::network::{SessionLink, Transport};

// ── SessionState ─────────────────────────────────────────────────

/// Authentication and connectivity state of the client.
///
/// ```text
///  Disconnected ──► Connecting ──► AwaitingWelcome ──► AwaitingCheckinAck
///       ▲               ▲  │              │                   │
///       │               │  ▼              ▼                   ▼
///       │             Failed ◄────────────┴───────────────────┤
///       │                                                     ▼
///       └──────────────────────────────────────────── Authenticated
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection. Initial state, and the state after a steady-state loss.
    #[default]
    Disconnected,

    /// TCP connect in progress.
    Connecting,

    /// Check-in sent; nothing heard from the broker yet.
    AwaitingWelcome,

    /// Broker greeted us; waiting for the check-in acknowledgement.
    AwaitingCheckinAck,

    /// Check-in accepted. Periodic activities may run.
    Authenticated {
        /// When the session became authenticated.
        since: Instant,
    },

    /// The last handshake attempt failed; a retry is pending.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::AwaitingWelcome => write!(f, "AwaitingWelcome"),
            Self::AwaitingCheckinAck => write!(f, "AwaitingCheckinAck"),
            Self::Authenticated { .. } => write!(f, "Authenticated"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// `true` while a handshake is in flight.
    pub fn is_handshaking(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingWelcome | Self::AwaitingCheckinAck
        )
    }

    /// How long the session has been authenticated, if it is.
    pub fn authenticated_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Authenticated { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`, `Failed` (retry).
    pub fn begin_connect(&mut self) -> Result<(), BigiotError> {
        match self {
            Self::Disconnected | Self::Failed => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(BigiotError::InvalidTransition(
                "cannot connect: not in Disconnected or Failed state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn checkin_sent(&mut self) -> Result<(), BigiotError> {
        match self {
            Self::Connecting => {
                *self = Self::AwaitingWelcome;
                Ok(())
            }
            _ => Err(BigiotError::InvalidTransition(
                "cannot await welcome: not in Connecting state",
            )),
        }
    }

    /// Valid from: `AwaitingWelcome`, `AwaitingCheckinAck` (repeat greeting).
    pub fn welcome_received(&mut self) -> Result<(), BigiotError> {
        match self {
            Self::AwaitingWelcome | Self::AwaitingCheckinAck => {
                *self = Self::AwaitingCheckinAck;
                Ok(())
            }
            _ => Err(BigiotError::InvalidTransition(
                "unexpected welcome: no check-in outstanding",
            )),
        }
    }

    /// Valid from: `AwaitingWelcome`, `AwaitingCheckinAck`.
    ///
    /// The broker does not always greet before acknowledging.
    pub fn checkin_accepted(&mut self) -> Result<(), BigiotError> {
        match self {
            Self::AwaitingWelcome | Self::AwaitingCheckinAck => {
                *self = Self::Authenticated {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(BigiotError::InvalidTransition(
                "unexpected check-in acknowledgement: no check-in outstanding",
            )),
        }
    }

    /// Valid from: `Connecting`, `AwaitingWelcome`, `AwaitingCheckinAck`.
    pub fn fail(&mut self) -> Result<(), BigiotError> {
        if self.is_handshaking() {
            *self = Self::Failed;
            Ok(())
        } else {
            Err(BigiotError::InvalidTransition(
                "cannot fail: no handshake in progress",
            ))
        }
    }

    /// Valid from: `Authenticated`.
    pub fn connection_lost(&mut self) -> Result<(), BigiotError> {
        match self {
            Self::Authenticated { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(BigiotError::InvalidTransition(
                "cannot lose connection: not Authenticated",
            )),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Session ──────────────────────────────────────────────────────

/// The client's single session: current state plus the connection it
/// owns while connected.
///
/// State changes are published on a `watch` channel; see
/// [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct Session {
    state: watch::Sender<SessionState>,
    connection: Option<Arc<dyn Transport>>,
    /// Received bytes not yet decoded into messages.
    inbound: BytesMut,
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            state,
            connection: None,
            inbound: BytesMut::new(),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Apply a transition and publish the new state if it changed.
    pub fn transition(
        &self,
        apply: impl FnOnce(&mut SessionState) -> Result<(), BigiotError>,
    ) -> Result<(), BigiotError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            let before = state.clone();
            outcome = apply(state);
            if *state != before {
                info!(from = %before, to = %state, "session state changed");
                true
            } else {
                false
            }
        });
        outcome
    }

    // ── Connection ───────────────────────────────────────────────

    /// Take ownership of a freshly opened connection.
    pub fn attach(&mut self, connection: Arc<dyn Transport>) {
        self.teardown_connection();
        self.connection = Some(connection);
    }

    pub fn connection(&self) -> Option<&Arc<dyn Transport>> {
        self.connection.as_ref()
    }

    /// A write gate over the current connection, usable only while
    /// the session is authenticated.
    pub fn link(&self) -> Result<SessionLink, BigiotError> {
        match &self.connection {
            Some(conn) if self.state.borrow().is_authenticated() => {
                Ok(SessionLink::new(Arc::clone(conn), self.subscribe()))
            }
            _ => Err(BigiotError::NotAuthenticated),
        }
    }

    /// Buffer of received but undecoded bytes.
    pub fn inbound_mut(&mut self) -> &mut BytesMut {
        &mut self.inbound
    }

    /// Hand the undecoded bytes to the caller, leaving the buffer empty.
    pub fn take_inbound(&mut self) -> BytesMut {
        std::mem::take(&mut self.inbound)
    }

    /// Close and drop the connection and discard buffered input.
    ///
    /// Leaves the state untouched; callers transition first.
    pub fn teardown_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.inbound.clear();
    }

    /// Close everything and return to `Disconnected`.
    pub fn shutdown(&mut self) {
        self.teardown_connection();
        self.transition(|state| {
            state.force_disconnect();
            Ok(())
        })
        .ok();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
