//! Admission controller: sliding-window rate limits plus a concurrency cap.
//!
//! Admission happens in two phases:
//!
//! 1. A concurrency slot. Slots are strictly FIFO: a caller that finds the cap
//!    reached joins a queue and a release hands its slot directly to the head of
//!    the queue, so `active_requests` never dips and a newcomer cannot steal it.
//! 2. The rate check. A slot holder whose cost does not fit the window sleeps
//!    until the oldest record is due to expire (clamped to the configured wait
//!    bounds) or until a release signals that the window may have changed, then
//!    rechecks. Rate admission is best-effort: whichever rechecking caller gets
//!    the lock first wins.
//!
//! Window, active count and waiter queue share one mutex, which is never held
//! across an await point.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, oneshot};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument};

use crate::core::limits::{Admission, RateLimiterConfig, decide, rate_decision};
use crate::core::window::{AdmissionRecord, SlidingWindow};
use crate::error::ConfigError;

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStatus {
    pub active_requests: usize,
    pub requests_in_window: usize,
    pub cost_in_window: u64,
    pub available_requests: usize,
    pub available_cost: u64,
    /// Callers queued for a concurrency slot.
    pub queued: usize,
}

pub struct AdmissionController {
    config: RateLimiterConfig,
    inner: Mutex<Inner>,
    rate_changed: Notify,
}

struct Inner {
    window: SlidingWindow,
    active: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
    next_permit: u64,
}

struct Waiter {
    ticket: u64,
    slot: oneshot::Sender<()>,
}

impl Inner {
    /// Give a freed slot to the oldest live waiter, or return it to the pool.
    fn hand_off_slot(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.slot.send(()).is_ok() {
                return;
            }
        }
        self.active = self.active.saturating_sub(1);
    }
}

impl AdmissionController {
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                window: SlidingWindow::new(config.window),
                active: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
                next_permit: 0,
            }),
            config,
            rate_changed: Notify::new(),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `cost` can be admitted, then record it.
    ///
    /// Never fails. The returned permit releases its slot when dropped.
    #[instrument(skip_all, fields(cost = cost))]
    pub async fn acquire(&self, cost: u64) -> Permit<'_> {
        let slot = self.acquire_slot().await;
        loop {
            // Registered before the check so a release between the check and the
            // sleep still wakes us.
            let notified = self.rate_changed.notified();
            let wait = {
                let mut inner = self.lock();
                let now = Instant::now();
                inner.window.prune(now);
                // An empty window cannot get any emptier: admit oversized costs
                // instead of waiting forever.
                let ready = inner.window.is_empty()
                    || rate_decision(&self.config, &inner.window, cost).is_ready();
                if ready {
                    let id = inner.next_permit;
                    inner.next_permit += 1;
                    inner.window.push(AdmissionRecord {
                        id,
                        timestamp: now,
                        cost,
                    });
                    info!(
                        permit = id,
                        active = inner.active,
                        requests_in_window = inner.window.request_count(),
                        cost_in_window = inner.window.cost_sum(),
                        "admitted"
                    );
                    slot.disarm();
                    return Permit {
                        controller: self,
                        id,
                        cost,
                        released: false,
                    };
                }
                self.config
                    .recheck_interval(inner.window.until_oldest_expires(now))
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::select! {
                _ = sleep(wait) => {}
                _ = notified => {}
            }
        }
    }

    async fn acquire_slot(&self) -> SlotGuard<'_> {
        loop {
            let (ticket, rx) = {
                let mut inner = self.lock();
                if inner.waiters.is_empty() && inner.active < self.config.max_concurrent {
                    inner.active += 1;
                    return SlotGuard::new(self);
                }
                let ticket = inner.next_ticket;
                inner.next_ticket += 1;
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(Waiter { ticket, slot: tx });
                debug!(
                    ticket,
                    queued = inner.waiters.len(),
                    "concurrency cap reached, queued"
                );
                (ticket, rx)
            };

            let mut queued = QueuedSlot {
                controller: self,
                ticket,
                rx,
                granted: false,
            };
            if (&mut queued.rx).await.is_ok() {
                queued.granted = true;
                return SlotGuard::new(self);
            }
            // The sender vanished without a grant; queue again.
            queued.granted = true;
        }
    }

    /// Release `permit`, optionally correcting its recorded cost.
    pub fn release(&self, permit: Permit<'_>, actual_cost: Option<u64>) {
        permit.release(actual_cost);
    }

    fn release_permit(&self, id: u64, actual_cost: Option<u64>) {
        {
            let mut inner = self.lock();
            if let Some(actual) = actual_cost
                && !inner.window.reconcile(id, actual)
            {
                debug!(permit = id, "record already left the window");
            }
            inner.hand_off_slot();
            debug!(permit = id, active = inner.active, "released");
        }
        self.rate_changed.notify_waiters();
    }

    /// Whether `cost` would be admitted right now without waiting.
    pub fn can_proceed(&self, cost: u64) -> bool {
        self.decision(cost).is_ready()
    }

    /// Like [`can_proceed`](Self::can_proceed), reporting the first failing check.
    pub fn decision(&self, cost: u64) -> Admission {
        let mut inner = self.lock();
        inner.window.prune(Instant::now());
        decide(&self.config, inner.active, &inner.window, cost)
    }

    pub fn status(&self) -> AdmissionStatus {
        let mut inner = self.lock();
        inner.window.prune(Instant::now());
        let requests_in_window = inner.window.request_count();
        let cost_in_window = inner.window.cost_sum();
        AdmissionStatus {
            active_requests: inner.active,
            requests_in_window,
            cost_in_window,
            available_requests: self
                .config
                .max_requests_per_window
                .saturating_sub(requests_in_window),
            available_cost: self.config.max_cost_per_window.saturating_sub(cost_in_window),
            queued: inner.waiters.len(),
        }
    }

    /// Run `fut` under a permit for `cost`, releasing it on every exit path.
    pub async fn with_permit<F, T>(&self, cost: u64, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let permit = self.acquire(cost).await;
        let output = fut.await;
        permit.release(None);
        output
    }
}

/// Proof of admission. Dropping it releases the slot without a cost correction.
#[must_use = "dropping a permit releases it immediately"]
#[derive(Debug)]
pub struct Permit<'a> {
    controller: &'a AdmissionController,
    id: u64,
    cost: u64,
    released: bool,
}

impl Permit<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cost recorded at admission.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn release(mut self, actual_cost: Option<u64>) {
        self.released = true;
        self.controller.release_permit(self.id, actual_cost);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.controller.release_permit(self.id, None);
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A held concurrency slot that has not been turned into a permit yet.
struct SlotGuard<'a> {
    controller: &'a AdmissionController,
    armed: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(controller: &'a AdmissionController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.lock().hand_off_slot();
        }
    }
}

/// A queued slot request. Dropping it before the grant leaves the queue; dropping
/// it after an unobserved grant passes the slot on.
struct QueuedSlot<'a> {
    controller: &'a AdmissionController,
    ticket: u64,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for QueuedSlot<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        let mut inner = self.controller.lock();
        if let Some(pos) = inner.waiters.iter().position(|w| w.ticket == self.ticket) {
            inner.waiters.remove(pos);
            debug!(ticket = self.ticket, "queued acquire cancelled");
            return;
        }
        if self.rx.try_recv().is_ok() {
            debug!(ticket = self.ticket, "cancelled after grant, passing slot on");
            inner.hand_off_slot();
        }
    }
}
