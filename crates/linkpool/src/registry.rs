//! Idle registry — the pool's only shared mutable state.
//!
//! Holds the FIFO queue of idle handles, the total handle count (idle + on
//! loan), the number of acquirers currently waiting, and lifetime counters.
//! Everything lives behind one short-held `std::sync::Mutex` that is never
//! held across an `.await`, so the release path can run from `Drop`.
//!
//! Two wake-ups hang off the registry:
//!
//! ```text
//! available  (broadcast)   put()/close()            → every waiting acquirer re-checks
//! demand     (single)      waiter on empty queue / discard → replenisher re-checks
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::handle::ConnectionHandle;
use crate::stats::PoolStats;

#[derive(Debug, Default)]
struct RegistryState {
    idle: VecDeque<ConnectionHandle>,
    total: usize,
    waiters: usize,
    closed: bool,
    created: u64,
    reaped: u64,
    discarded: u64,
    connect_failures: u64,
    timeouts: u64,
}

/// Outcome of waiting for an idle handle.
#[derive(Debug)]
pub(crate) enum Taken {
    Handle(ConnectionHandle),
    TimedOut,
    Closed,
}

#[derive(Debug)]
pub(crate) struct IdleRegistry {
    state: Mutex<RegistryState>,
    available: Notify,
    demand: Notify,
    max_size: usize,
}

impl IdleRegistry {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            available: Notify::new(),
            demand: Notify::new(),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Registry mutations never leave the state half-updated, so a
        // poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pop the oldest idle handle without waiting.
    pub(crate) fn try_take(&self) -> Option<ConnectionHandle> {
        self.lock().idle.pop_front()
    }

    /// Wait until an idle handle can be popped, the deadline passes, or the
    /// registry closes.
    ///
    /// Every pass that finds the queue empty while the pool has room signals
    /// demand, so the replenisher keeps growing while waiters outnumber idle
    /// handles. Cancel-safe: dropping the future deregisters the waiter.
    pub(crate) async fn take_until(&self, deadline: Instant) -> Taken {
        let mut waiter: Option<WaiterGuard<'_>> = None;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register interest before inspecting the queue so a put() that
            // lands between the check and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Taken::Closed;
                }
                if let Some(handle) = state.idle.pop_front() {
                    if let Some(guard) = waiter.take() {
                        guard.settle(&mut state);
                    }
                    return Taken::Handle(handle);
                }
                if waiter.is_none() {
                    state.waiters += 1;
                    waiter = Some(WaiterGuard::new(self));
                }
                if state.total < self.max_size {
                    self.demand.notify_one();
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut state = self.lock();
                if let Some(guard) = waiter.take() {
                    guard.settle(&mut state);
                }
                if state.closed {
                    return Taken::Closed;
                }
                return match state.idle.pop_front() {
                    Some(handle) => Taken::Handle(handle),
                    None => {
                        state.timeouts += 1;
                        Taken::TimedOut
                    }
                };
            }
        }
    }

    /// Return an already-counted handle to the tail of the queue.
    ///
    /// Never blocks. If the registry is closed the handle is uncounted and
    /// handed back so the caller can close it.
    pub(crate) fn put(&self, mut handle: ConnectionHandle) -> Result<usize, ConnectionHandle> {
        let idle = {
            let mut state = self.lock();
            if state.closed {
                state.total = state.total.saturating_sub(1);
                return Err(handle);
            }
            handle.mark_idle();
            state.idle.push_back(handle);
            state.idle.len()
        };
        self.available.notify_waiters();
        Ok(idle)
    }

    /// Count a freshly connected handle into the pool and make it idle.
    ///
    /// Rejected (and handed back) when the registry is closed or already at
    /// `max_size`.
    pub(crate) fn admit(&self, mut handle: ConnectionHandle) -> Result<usize, ConnectionHandle> {
        let total = {
            let mut state = self.lock();
            if state.closed || state.total >= self.max_size {
                return Err(handle);
            }
            handle.mark_idle();
            state.idle.push_back(handle);
            state.total += 1;
            state.created += 1;
            state.total
        };
        self.available.notify_waiters();
        Ok(total)
    }

    /// Forget an on-loan handle that is being destroyed instead of returned.
    pub(crate) fn discard(&self) {
        let mut state = self.lock();
        state.total = state.total.saturating_sub(1);
        state.discarded += 1;
        if state.waiters > 0 {
            self.demand.notify_one();
        }
    }

    pub(crate) fn record_connect_failure(&self) {
        self.lock().connect_failures += 1;
    }

    /// Front-only eviction: pop from the head while the pool is above
    /// `min_size` and the head has been idle longer than `max_idle`.
    ///
    /// Returned handles are already uncounted; the caller closes them.
    pub(crate) fn reap(&self, min_size: usize, max_idle: Duration) -> Vec<ConnectionHandle> {
        let mut state = self.lock();
        let mut stale = Vec::new();
        while state.total > min_size
            && state
                .idle
                .front()
                .is_some_and(|handle| handle.idle_for() > max_idle)
        {
            if let Some(handle) = state.idle.pop_front() {
                stale.push(handle);
                state.total -= 1;
                state.reaped += 1;
            }
        }
        stale
    }

    /// Wait until the replenisher has work: more acquirers are waiting than
    /// there are idle handles to serve them, and there is room to grow.
    /// Returns `false` once closed.
    pub(crate) async fn wait_for_demand(&self) -> bool {
        loop {
            let notified = self.demand.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.lock();
                if state.closed {
                    return false;
                }
                if state.waiters > state.idle.len() && state.total < self.max_size {
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting handles and drain the idle queue.
    ///
    /// Returns `None` if the registry was already closed.
    pub(crate) fn close(&self) -> Option<Vec<ConnectionHandle>> {
        let drained = {
            let mut state = self.lock();
            if state.closed {
                return None;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        self.available.notify_waiters();
        self.demand.notify_one();
        Some(drained)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn total(&self) -> usize {
        self.lock().total
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.lock().idle.len()
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            active: state.total - state.idle.len(),
            waiting: state.waiters,
            created: state.created,
            reaped: state.reaped,
            discarded: state.discarded,
            connect_failures: state.connect_failures,
            timeouts: state.timeouts,
        }
    }
}

/// Deregisters a waiting acquirer on every exit path, including cancellation.
///
/// When the waiter is served under the registry lock it is settled there, so
/// `waiters` never counts an acquirer that already holds its handle.
struct WaiterGuard<'a> {
    registry: &'a IdleRegistry,
    armed: bool,
}

impl<'a> WaiterGuard<'a> {
    fn new(registry: &'a IdleRegistry) -> Self {
        Self {
            registry,
            armed: true,
        }
    }

    fn settle(mut self, state: &mut RegistryState) {
        state.waiters = state.waiters.saturating_sub(1);
        self.armed = false;
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.registry.lock();
            state.waiters = state.waiters.saturating_sub(1);
        }
    }
}
