//! Periodic activities.
//!
//! A [`Scheduler`] runs each registered [`PeriodicAction`] on its own
//! tokio task, at a fixed period, until it is cancelled. Cancelling the
//! scheduler (or the token it was created from) stops every activity.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Work performed on every tick of a schedule.
#[async_trait]
pub trait PeriodicAction: Send + 'static {
    async fn fire(&mut self);
}

/// Counters shared between a running schedule and its handle.
#[derive(Debug, Default)]
struct FireStats {
    fired: AtomicU64,
    last_fired: Mutex<Option<Instant>>,
}

impl FireStats {
    fn record(&self, at: Instant) {
        self.fired.fetch_add(1, Ordering::SeqCst);
        *self
            .last_fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(at);
    }
}

/// One recurring activity: its period, when it last fired, and the task
/// running it.
#[derive(Debug)]
pub struct ScheduleHandle {
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    stats: Arc<FireStats>,
    handle: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Spawn `action` to fire first after `delay`, then every `period`.
    ///
    /// The schedule stops when `parent` or the handle itself is cancelled.
    ///
    /// # Panics
    ///
    /// Panics in the caller if `period` is zero.
    pub fn spawn<A: PeriodicAction>(
        name: &'static str,
        delay: Duration,
        period: Duration,
        mut action: A,
        parent: &CancellationToken,
    ) -> Self {
        assert!(!period.is_zero(), "schedule `{name}` has a zero period");
        let token = parent.child_token();
        let stats = Arc::new(FireStats::default());

        let handle = tokio::spawn({
            let token = token.clone();
            let stats = Arc::clone(&stats);
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + delay, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!(schedule = name, ?period, "schedule started");
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        at = ticker.tick() => {
                            stats.record(at);
                            trace!(schedule = name, "firing");
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => break,
                                _ = action.fire() => {}
                            }
                        }
                    }
                }
                debug!(schedule = name, "schedule stopped");
            }
        });

        Self {
            name,
            period,
            token,
            stats,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// How many times the action has fired.
    pub fn fired(&self) -> u64 {
        self.stats.fired.load(Ordering::SeqCst)
    }

    /// When the action last fired.
    pub fn last_fired(&self) -> Option<Instant> {
        *self
            .stats
            .last_fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stop firing. The task exits at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `false` once cancelled or finished.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Cancel and wait for the task to exit.
    pub async fn join(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            debug!(schedule = self.name, "schedule task ended abnormally: {e}");
        }
    }
}

/// Owns a group of schedules that live and die together.
#[derive(Debug)]
pub struct Scheduler {
    token: CancellationToken,
    schedules: Vec<ScheduleHandle>,
}

impl Scheduler {
    /// A scheduler whose schedules also stop when `parent` is cancelled.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            schedules: Vec::new(),
        }
    }

    /// Fire `action` every `period`, the first time one period from now.
    pub fn every<A: PeriodicAction>(&mut self, name: &'static str, period: Duration, action: A) {
        self.every_after(name, period, period, action);
    }

    /// Fire `action` after `delay`, then every `period`.
    pub fn every_after<A: PeriodicAction>(
        &mut self,
        name: &'static str,
        delay: Duration,
        period: Duration,
        action: A,
    ) {
        self.schedules
            .push(ScheduleHandle::spawn(name, delay, period, action, &self.token));
    }

    pub fn get(&self, name: &str) -> Option<&ScheduleHandle> {
        self.schedules.iter().find(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Stop every schedule and wait until all of them have exited.
    pub async fn shutdown(self) {
        self.token.cancel();
        futures::future::join_all(self.schedules.into_iter().map(ScheduleHandle::join)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────
