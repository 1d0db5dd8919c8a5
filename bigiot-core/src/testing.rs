//! In-memory broker stand-ins for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};

use crate::error::BigiotError;
use crate::network::{Connector, Transport};

/// Scripted transport: records every send, serves queued inbound bytes.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<BytesMut>,
    /// Queued as inbound data as soon as a check-in is sent.
    checkin_reply: Option<Vec<u8>>,
    hung_up: AtomicBool,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    pub(crate) fn new(checkin_reply: Option<&[u8]>) -> Self {
        Self {
            checkin_reply: checkin_reply.map(<[u8]>::to_vec),
            ..Self::default()
        }
    }

    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend_from_slice(bytes);
    }

    /// After buffered input is drained, reads report the peer closed.
    pub(crate) fn hang_up(&self) {
        self.hung_up.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent_lines(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    /// Number of sent frames whose method is `method`.
    pub(crate) fn sent_count(&self, method: &str) -> usize {
        let needle = format!("{{\"M\":\"{method}\"");
        self.sent_lines()
            .iter()
            .filter(|line| line.starts_with(&needle))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, bytes: &[u8]) -> Result<usize, BigiotError> {
        if self.is_closed() || self.fail_sends.load(Ordering::SeqCst) {
            return Err(BigiotError::Send(std::io::ErrorKind::BrokenPipe.into()));
        }
        self.sent.lock().unwrap().push(bytes.to_vec());
        if bytes.starts_with(b"{\"M\":\"checkin\"") {
            if let Some(reply) = &self.checkin_reply {
                self.push_inbound(reply);
            }
        }
        Ok(bytes.len())
    }

    fn try_receive(&self, buf: &mut [u8]) -> Result<usize, BigiotError> {
        if self.is_closed() {
            return Err(BigiotError::ConnectionClosed);
        }
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.is_empty() {
            if self.hung_up.load(Ordering::SeqCst) {
                return Err(BigiotError::ConnectionClosed);
            }
            return Ok(0);
        }
        let n = buf.len().min(inbound.len());
        buf[..n].copy_from_slice(&inbound[..n]);
        inbound.advance(n);
        Ok(n)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out a fresh [`MockTransport`] per connect and keeps them all.
#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    checkin_reply: Option<Vec<u8>>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
    opened: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    /// Every connection answers a check-in with `reply`.
    pub(crate) fn replying(reply: &[u8]) -> Self {
        Self {
            checkin_reply: Some(reply.to_vec()),
            ..Self::default()
        }
    }

    /// Connections never say anything.
    pub(crate) fn silent() -> Self {
        Self::default()
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn latest(&self) -> Option<Arc<MockTransport>> {
        self.opened.lock().unwrap().last().cloned()
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>, BigiotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BigiotError::Connect {
                addr: format!("{host}:{port}"),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }
        let transport = Arc::new(MockTransport::new(self.checkin_reply.as_deref()));
        self.opened.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Assert that `expected` (virtual) time passed since `started`, give or
/// take the timer wheel's millisecond rounding.
#[track_caller]
pub(crate) fn assert_elapsed(started: tokio::time::Instant, expected: std::time::Duration) {
    let elapsed = started.elapsed();
    let slack = std::time::Duration::from_millis(5);
    assert!(
        elapsed >= expected && elapsed <= expected + slack,
        "expected {expected:?} to elapse, got {elapsed:?}"
    );
}
