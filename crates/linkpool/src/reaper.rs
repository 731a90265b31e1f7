//! Reaper — periodic eviction of surplus idle handles.
//!
//! Every `reap_interval` the reaper pops handles from the front of the idle
//! queue while the pool holds more than `min_size` handles and the front one
//! has been idle longer than `max_idle`. Only the front is inspected, so
//! eviction follows return order rather than true least-recently-used order.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::pool::Shared;

pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let period = shared.config.reap_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(interval = ?period, "reaper started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                reap_once(&shared);
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("reaper stopped");
}

/// One reaper tick. Returns how many handles were closed.
pub(crate) fn reap_once(shared: &Shared) -> usize {
    let stale = shared
        .registry
        .reap(shared.config.min_size, shared.config.max_idle);
    let reaped = stale.len();
    for handle in stale {
        handle.close();
    }
    if reaped > 0 {
        info!(
            reaped,
            remaining = shared.registry.total(),
            min_size = shared.config.min_size,
            "reaped idle connections"
        );
    }
    reaped
}
