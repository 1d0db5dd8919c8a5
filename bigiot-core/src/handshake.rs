//! Check-in handshake.
//!
//! ```text
//! Device ──[TCP connect]──────────────────────────► Broker
//! Device ──{"M":"checkin","ID":..,"K":..}─────────► Broker
//! Device ◄─{"M":"WELCOME TO BIGIOT"}────────────── Broker   (optional)
//! Device ◄─{"M":"checkinok"}────────────────────── Broker
//! ```
//!
//! The reply is polled for a fixed number of rounds; each unsuccessful
//! round waits one poll interval. A failed attempt is retried after a
//! fixed backoff, for as long as the client runs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, BigiotCodec, MAX_LINE_LENGTH};
use crate::error::BigiotError;
use crate::message::ProtocolMessage;
use crate::network::{Connector, Credentials, Transport};
use crate::state::{Session, SessionState};

/// Polling rounds before a check-in is given up.
pub const DEFAULT_POLL_ROUNDS: u32 = 5;
/// Wait between two polling rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Wait between a failed handshake and the next attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Timing of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub poll_rounds: u32,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_rounds: DEFAULT_POLL_ROUNDS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Run one handshake attempt, driving `session` from `Disconnected` or
/// `Failed` to `Authenticated`.
///
/// On error the connection is closed and the session is left `Failed`.
pub async fn authenticate<C: Connector + ?Sized>(
    session: &mut Session,
    connector: &C,
    credentials: &Credentials,
    config: &HandshakeConfig,
) -> Result<(), BigiotError> {
    session.transition(SessionState::begin_connect)?;

    match run_attempt(session, connector, credentials, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            session.teardown_connection();
            session.transition(SessionState::fail)?;
            Err(e)
        }
    }
}

async fn run_attempt<C: Connector + ?Sized>(
    session: &mut Session,
    connector: &C,
    credentials: &Credentials,
    config: &HandshakeConfig,
) -> Result<(), BigiotError> {
    debug!(endpoint = %credentials.endpoint(), "connecting");
    let conn = connector
        .connect(credentials.host(), credentials.port())
        .await?;
    session.attach(Arc::clone(&conn));

    let checkin = ProtocolMessage::Checkin {
        device_id: credentials.device_id().to_string(),
        api_key: credentials.api_key().to_string(),
    };
    conn.send(&codec::encode(&checkin)?).await?;
    session.transition(SessionState::checkin_sent)?;

    let mut codec = BigiotCodec::new();
    let mut chunk = vec![0u8; MAX_LINE_LENGTH];
    for round in 1..=config.poll_rounds {
        receive_available(conn.as_ref(), &mut chunk, session)?;

        while let Some(msg) = codec.next_message(session.inbound_mut()) {
            match msg {
                ProtocolMessage::Welcome => {
                    debug!("broker welcome received");
                    session.transition(SessionState::welcome_received)?;
                }
                ProtocolMessage::CheckinOk => {
                    session.transition(SessionState::checkin_accepted)?;
                    info!(device = credentials.device_id(), round, "check-in accepted");
                    return Ok(());
                }
                other => debug!(%other, "ignoring message during handshake"),
            }
        }

        debug!(round, "no check-in acknowledgement yet");
        tokio::time::sleep(config.poll_interval).await;
    }

    Err(BigiotError::HandshakeTimeout {
        rounds: config.poll_rounds,
    })
}

/// Drain everything the transport has buffered into the session.
fn receive_available(
    conn: &dyn Transport,
    chunk: &mut [u8],
    session: &mut Session,
) -> Result<(), BigiotError> {
    loop {
        let n = conn.try_receive(chunk)?;
        if n == 0 {
            return Ok(());
        }
        session.inbound_mut().extend_from_slice(&chunk[..n]);
    }
}

/// Repeat [`authenticate`] with a fixed backoff until it succeeds.
///
/// Returns `Err(Cancelled)` only when `shutdown` fires.
pub async fn authenticate_with_retry<C: Connector + ?Sized>(
    session: &mut Session,
    connector: &C,
    credentials: &Credentials,
    config: &HandshakeConfig,
    shutdown: &CancellationToken,
) -> Result<(), BigiotError> {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = authenticate(session, connector, credentials, config) => Some(result),
        };
        match outcome {
            None => {
                session.shutdown();
                return Err(BigiotError::Cancelled);
            }
            Some(Ok(())) => return Ok(()),
            Some(Err(e)) => {
                warn!(
                    attempt,
                    endpoint = %credentials.endpoint(),
                    "handshake failed: {e}; retrying in {:?}",
                    config.retry_backoff
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                session.shutdown();
                return Err(BigiotError::Cancelled);
            }
            _ = tokio::time::sleep(config.retry_backoff) => {}
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockTransport, assert_elapsed};
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    fn credentials() -> Credentials {
        Credentials::new("sw00", "dev1", "k1", "h", 1)
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_checkin_ok_authenticates_in_first_round() {
        let connector = MockConnector::replying(b"{\"M\":\"checkinok\"}\n");
        let mut session = Session::new();
        let started = Instant::now();

        assert_ok!(
            authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
                .await
        );

        assert!(session.state().is_authenticated());
        assert!(started.elapsed() < Duration::from_secs(1));
        let sent = connector.latest().unwrap().sent_lines();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("\"ID\":\"dev1\""));
        assert!(sent[0].contains("\"K\":\"k1\""));
    }

    #[tokio::test(start_paused = true)]
    async fn welcome_then_checkin_ok_in_one_read() {
        let connector =
            MockConnector::replying(b"{\"M\":\"WELCOME TO BIGIOT\"}\n{\"M\":\"checkinok\"}\n");
        let mut session = Session::new();
        let mut states = session.subscribe();

        assert_ok!(
            authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
                .await
        );
        assert!(states.borrow_and_update().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_bytes_stay_in_session_buffer() {
        let connector = MockConnector::replying(
            b"{\"M\":\"checkinok\"}\n{\"M\":\"say\",\"C\":\"play\"}\n",
        );
        let mut session = Session::new();
        assert_ok!(
            authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
                .await
        );
        let mut rest = session.take_inbound();
        assert_eq!(
            BigiotCodec::new().next_message(&mut rest),
            Some(ProtocolMessage::command("play"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_fails_after_five_rounds() {
        let connector = MockConnector::silent();
        let mut session = Session::new();
        let started = Instant::now();

        let err = authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BigiotError::HandshakeTimeout { rounds: 5 }));
        assert_elapsed(started, Duration::from_secs(5));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.connection().is_none());
        assert!(connector.latest().unwrap().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_within_bound_authenticates() {
        let connector = Arc::new(MockConnector::silent());
        let mut session = Session::new();
        let started = Instant::now();

        let feeder = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(3_500)).await;
                let transport: Arc<MockTransport> = connector.latest().unwrap();
                transport.push_inbound(b"{\"M\":\"checkinok\"}\n");
            })
        };

        assert_ok!(
            authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
                .await
        );
        feeder.await.unwrap();
        // Reply lands between round 4 (t=3s) and round 5 (t=4s).
        assert_elapsed(started, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_leaves_session_failed() {
        let connector = MockConnector::silent();
        connector.refuse_connections(true);
        let mut session = Session::new();

        let err = authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BigiotError::Connect { .. }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_hangup_during_handshake_fails() {
        let connector = Arc::new(MockConnector::silent());
        let mut session = Session::new();
        let hangup = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                connector.latest().unwrap().hang_up();
            })
        };

        let err = authenticate(&mut session, &connector, &credentials(), &HandshakeConfig::default())
            .await
            .unwrap_err();
        hangup.await.unwrap();
        assert!(matches!(err, BigiotError::ConnectionClosed));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reconnects_after_backoff() {
        let connector = Arc::new(MockConnector::silent());
        let shutdown = CancellationToken::new();
        let mut session = Session::new();
        let states = session.subscribe();

        let task = {
            let connector = Arc::clone(&connector);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                authenticate_with_retry(
                    &mut session,
                    &connector,
                    &credentials(),
                    &HandshakeConfig::default(),
                    &shutdown,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(*states.borrow(), SessionState::AwaitingWelcome);
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await; // t = 5.1s
        assert_eq!(*states.borrow(), SessionState::Failed);

        tokio::time::sleep(Duration::from_millis(4_800)).await; // t = 9.9s
        assert_eq!(*states.borrow(), SessionState::Failed);
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await; // t = 10.1s
        assert_eq!(connector.attempts(), 2);
        assert_eq!(*states.borrow(), SessionState::AwaitingWelcome);

        shutdown.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(BigiotError::Cancelled)));
        assert_eq!(*states.borrow(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_once_authenticated() {
        let connector = Arc::new(MockConnector::silent());
        connector.refuse_connections(true);
        let shutdown = CancellationToken::new();
        let mut session = Session::new();

        let flip = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(7)).await;
                connector.refuse_connections(false);
            })
        };
        let replying = Arc::new(MockConnector::replying(b"{\"M\":\"checkinok\"}\n"));
        // Refused while the gate refuses, then a replying broker.
        struct Either(Arc<MockConnector>, Arc<MockConnector>);
        #[async_trait::async_trait]
        impl Connector for Either {
            async fn connect(
                &self,
                host: &str,
                port: u16,
            ) -> Result<Arc<dyn Transport>, BigiotError> {
                self.0.connect(host, port).await?;
                self.1.connect(host, port).await
            }
        }
        let either = Either(Arc::clone(&connector), Arc::clone(&replying));

        let started = Instant::now();
        assert_ok!(
            authenticate_with_retry(
                &mut session,
                &either,
                &credentials(),
                &HandshakeConfig::default(),
                &shutdown,
            )
            .await
        );
        flip.await.unwrap();
        // Refused at t=0 and t=5, accepted at t=10.
        assert_eq!(connector.attempts(), 3);
        assert_elapsed(started, Duration::from_secs(10));
        assert!(session.state().is_authenticated());
    }
}
