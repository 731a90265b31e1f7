//! Replenisher — background task that grows the pool under unmet demand.
//!
//! ```text
//!            demand (queue empty, waiter present, total < max)
//!   Idle ───────────────────────────────────────────────▶ Growing
//!    ▲                                                      │
//!    │ connected (backoff reset)                            │ connect failed
//!    └──────────────────────────────────────────────────────┤
//!    ▲                                                      ▼
//!    └──────────────── delay elapsed ──────────────── Backoff(delay)
//! ```
//!
//! Each failed connect doubles the delay up to `retry_max_backoff`; a
//! success resets it. Shutdown interrupts `Idle` and `Backoff`; a connect
//! already in flight runs to completion and its handle is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::pool::Shared;

/// Where the replenisher loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReplenishState {
    Idle,
    Growing,
    Backoff(Duration),
}

/// Exponential retry delay between failed connects.
#[derive(Debug)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait now; doubles the next one up to `max`.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.base;
    }
}

pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut state = ReplenishState::Idle;
    let mut backoff = Backoff::new(
        shared.config.retry_base_backoff,
        shared.config.retry_max_backoff,
    );
    debug!("replenisher started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        state = match state {
            ReplenishState::Idle => tokio::select! {
                wanted = shared.registry.wait_for_demand() => {
                    if !wanted {
                        break;
                    }
                    ReplenishState::Growing
                }
                _ = shutdown.changed() => break,
            },
            ReplenishState::Growing => grow(&shared, &mut backoff).await,
            ReplenishState::Backoff(delay) => tokio::select! {
                _ = tokio::time::sleep(delay) => ReplenishState::Idle,
                _ = shutdown.changed() => break,
            },
        };
    }

    debug!("replenisher stopped");
}

/// One `Growing` step: open a handle and admit it.
pub(crate) async fn grow(shared: &Shared, backoff: &mut Backoff) -> ReplenishState {
    match shared.open_handle().await {
        Ok(handle) => {
            let id = handle.id();
            match shared.registry.admit(handle) {
                Ok(total) => debug!(handle = id, total, "replenished connection"),
                Err(handle) => {
                    debug!(handle = id, "pool full or shut down, closing new connection");
                    handle.close();
                }
            }
            backoff.reset();
            ReplenishState::Idle
        }
        Err(e) => {
            shared.registry.record_connect_failure();
            let delay = backoff.next_delay();
            warn!(error = %e, retry_in = ?delay, "failed to open connection");
            ReplenishState::Backoff(delay)
        }
    }
}
