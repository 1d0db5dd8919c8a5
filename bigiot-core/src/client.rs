//! Client orchestration.
//!
//! [`Client::run`] authenticates, then serves the session: heartbeat and
//! telemetry run as scheduled activities while the read loop routes
//! inbound commands to the dispatcher. When the read path reports the
//! connection gone, the session drops to `Disconnected`, the schedules
//! stop, and the handshake starts over.

use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{BigiotCodec, MAX_LINE_LENGTH};
use crate::dispatch::{Actuator, CommandDispatcher};
use crate::error::BigiotError;
use crate::handshake::{self, HandshakeConfig};
use crate::heartbeat::Heartbeat;
use crate::message::ProtocolMessage;
use crate::network::{Connector, Credentials, TcpConnector, Transport};
use crate::state::{Session, SessionState};
use crate::task::Scheduler;
use crate::telemetry::{DataPoint, DataSource, TelemetryPublisher};

/// Timing of every client activity, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub heartbeat_period_ms: u64,
    pub telemetry_period_ms: u64,
    pub handshake_poll_rounds: u32,
    pub handshake_poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub read_poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: 3_000,
            telemetry_period_ms: 5_000,
            handshake_poll_rounds: handshake::DEFAULT_POLL_ROUNDS,
            handshake_poll_interval_ms: 1_000,
            retry_backoff_ms: 5_000,
            read_poll_interval_ms: 1_000,
            connect_timeout_ms: 10_000,
            send_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    pub fn handshake(&self) -> HandshakeConfig {
        HandshakeConfig {
            poll_rounds: self.handshake_poll_rounds,
            poll_interval: Duration::from_millis(self.handshake_poll_interval_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    // Periods are floored at 1ms; a zero period cannot be scheduled.

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms.max(1))
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(self.telemetry_period_ms.max(1))
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms.max(1))
    }

    /// A TCP connector with this config's timeouts.
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(
            Duration::from_millis(self.connect_timeout_ms),
            Duration::from_millis(self.send_timeout_ms),
        )
    }
}

/// One device's connection to the broker, for the lifetime of the process.
pub struct Client<C, A, S> {
    credentials: Credentials,
    config: ClientConfig,
    connector: C,
    dispatcher: CommandDispatcher<A>,
    data_point: DataPoint<S>,
    session: Session,
    shutdown: CancellationToken,
}

impl<C, A, S> Client<C, A, S>
where
    C: Connector,
    A: Actuator,
    S: DataSource,
{
    pub fn new(
        credentials: Credentials,
        config: ClientConfig,
        connector: C,
        actuator: A,
        data_point: DataPoint<S>,
    ) -> Self {
        Self {
            credentials,
            config,
            connector,
            dispatcher: CommandDispatcher::new(actuator),
            data_point,
            session: Session::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel the returned token to stop [`run`](Self::run).
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Watch every session state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Authenticate and serve until shut down, re-authenticating after
    /// every connection loss.
    ///
    /// Returns `Ok(())` once the shutdown handle is cancelled; the
    /// connection is closed by then.
    pub async fn run(&mut self) -> Result<(), BigiotError> {
        let handshake = self.config.handshake();
        info!(
            device = self.credentials.device_name(),
            endpoint = %self.credentials.endpoint(),
            "client starting"
        );

        loop {
            let authenticated = handshake::authenticate_with_retry(
                &mut self.session,
                &self.connector,
                &self.credentials,
                &handshake,
                &self.shutdown,
            )
            .await;
            match authenticated {
                Ok(()) => {}
                Err(BigiotError::Cancelled) => break,
                Err(e) => {
                    self.session.shutdown();
                    return Err(e);
                }
            }

            match self.serve().await {
                Ok(()) => break,
                Err(e) if e.is_connection_loss() => {
                    warn!("connection lost: {e}; re-running handshake")
                }
                Err(e) => warn!("session ended: {e}; re-running handshake"),
            }
        }

        self.session.shutdown();
        info!("client stopped");
        Ok(())
    }

    /// Run the authenticated session until shutdown (`Ok`) or until the
    /// read path fails (`Err`).
    async fn serve(&mut self) -> Result<(), BigiotError> {
        let link = self.session.link()?;
        let conn = link.transport().clone();
        let pending = self.session.take_inbound();

        let mut scheduler = Scheduler::new(&self.shutdown);
        scheduler.every(
            "heartbeat",
            self.config.heartbeat_period(),
            Heartbeat::new(link.clone()),
        );
        scheduler.every_after(
            "telemetry",
            Duration::ZERO,
            self.config.telemetry_period(),
            TelemetryPublisher::new(link, self.credentials.device_id(), self.data_point.clone()),
        );
        debug!(schedules = scheduler.len(), "periodic activities started");

        let outcome = self.read_loop(conn.as_ref(), pending).await;

        // Senders must see the loss before the schedules are torn down.
        if outcome.is_err() {
            let uptime = self.session.state().authenticated_duration();
            if let Err(e) = self.session.transition(SessionState::connection_lost) {
                debug!("{e}");
            }
            info!(?uptime, "session dropped");
        }
        scheduler.shutdown().await;
        if outcome.is_err() {
            self.session.teardown_connection();
        }
        outcome
    }

    /// Poll the connection, decode, and route until shutdown or a read
    /// error. `pending` holds bytes left over from the handshake.
    async fn read_loop(&self, conn: &dyn Transport, mut pending: BytesMut) -> Result<(), BigiotError> {
        let mut codec = BigiotCodec::new();
        let mut chunk = vec![0u8; MAX_LINE_LENGTH];
        let interval = self.config.read_poll_interval();

        loop {
            loop {
                let n = conn.try_receive(&mut chunk)?;
                if n == 0 {
                    break;
                }
                trace!(n, "received");
                pending.extend_from_slice(&chunk[..n]);
            }

            while let Some(msg) = codec.next_message(&mut pending) {
                self.route(&msg);
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn route(&self, msg: &ProtocolMessage) {
        match msg {
            ProtocolMessage::Command(_) => {
                self.dispatcher.dispatch(msg);
            }
            ProtocolMessage::Heartbeat => trace!("broker heartbeat"),
            other => debug!(%other, "ignoring inbound message"),
        }
    }
}

/// Connect to the broker described by `credentials` and serve forever.
///
/// Uses default timing and a plain TCP connector. Only returns if the
/// client fails in a way retrying cannot fix.
pub async fn start<A, S>(
    credentials: Credentials,
    data_point: DataPoint<S>,
    actuator: A,
) -> Result<(), BigiotError>
where
    A: Actuator,
    S: DataSource,
{
    let config = ClientConfig::default();
    let connector = config.connector();
    Client::new(credentials, config, connector, actuator, data_point)
        .run()
        .await
}

// ── Tests ────────────────────────────────────────────────────────
