//! # bigiot-core
//!
//! Device-side client engine for the BigIoT telemetry and command broker.
//!
//! This crate contains:
//! - **Message**: `ProtocolMessage`, the closed set of wire messages
//! - **Codec**: `encode`/`decode` for newline-delimited JSON, and `BigiotCodec` for `tokio_util` framing
//! - **Network**: `Transport`/`Connector` seams, the nonblocking `BigiotConnection`, `Credentials`
//! - **State**: the `SessionState` machine and the `Session` that owns the connection
//! - **Handshake**: check-in with bounded polling and fixed-backoff retry
//! - **Task**: `Scheduler` for periodic activities with cancellation
//! - **Heartbeat / Telemetry**: the two periodic senders
//! - **Dispatch**: `CommandDispatcher` mapping remote verbs onto an `Actuator`
//! - **Client**: `Client`, which ties all of the above into one run loop
//! - **Identity**: `IdentityStore` for the provisioned network identity
//! - **Error**: `BigiotError`, typed, `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod identity;
pub mod message;
pub mod network;
pub mod state;
pub mod task;
pub mod telemetry;

#[cfg(test)]
mod testing;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{Client, ClientConfig, start};
pub use codec::{BigiotCodec, MAX_LINE_LENGTH};
pub use dispatch::{Actuator, CommandDispatcher, Dispatched, Verb};
pub use error::BigiotError;
pub use handshake::HandshakeConfig;
pub use heartbeat::Heartbeat;
pub use identity::{FileIdentityStore, IdentityStore, NetworkIdentity};
pub use message::{ProtocolMessage, RemoteCommand};
pub use network::{BigiotConnection, Connection, Connector, Credentials, SessionLink, TcpConnector, Transport};
pub use state::{Session, SessionState};
pub use task::{PeriodicAction, ScheduleHandle, Scheduler};
pub use telemetry::{DataPoint, DataSource, TelemetryPublisher};
