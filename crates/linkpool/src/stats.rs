//! Pool statistics snapshot.

use serde::Serialize;

/// Point-in-time view of a pool's counters.
///
/// `total == idle + active` holds for every snapshot because all fields are
/// read under the registry lock.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Handles owned by the pool (idle + on loan).
    pub total: usize,
    /// Handles sitting in the idle queue.
    pub idle: usize,
    /// Handles currently on loan.
    pub active: usize,
    /// Acquirers currently blocked waiting for a handle.
    pub waiting: usize,
    /// Handles ever connected and admitted.
    pub created: u64,
    /// Handles closed by the reaper.
    pub reaped: u64,
    /// Handles closed on release or acquire because they were broken.
    pub discarded: u64,
    /// Failed connect attempts (start-up and replenisher).
    pub connect_failures: u64,
    /// Acquires that ran out of time.
    pub timeouts: u64,
}

impl PoolStats {
    /// Fraction of handles on loan (0.0 for an empty pool).
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Every handle is on loan.
    pub fn is_exhausted(&self) -> bool {
        self.total > 0 && self.idle == 0
    }
}
