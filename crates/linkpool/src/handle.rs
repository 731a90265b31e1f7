//! Connection handle — one backend link plus the bookkeeping the pool needs.

use std::time::Duration;

use tokio::time::Instant;

use crate::driver::Link;
use crate::error::DriverError;

/// A single pooled link.
///
/// A handle is owned by exactly one party at a time: the idle registry while
/// it sits in the pool, or a [`PooledConnection`](crate::PooledConnection)
/// while it is on loan. `idle_since` is refreshed every time the handle is
/// put back.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: u64,
    created_at: Instant,
    idle_since: Instant,
    link: Box<dyn Link>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: u64, link: Box<dyn Link>) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            idle_since: now,
            link,
        }
    }

    /// Pool-unique identity of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Age of the underlying link.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the handle was last returned to the pool.
    pub fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    /// Probe the link.
    pub fn is_alive(&mut self) -> bool {
        self.link.is_alive()
    }

    /// Raw passthrough write.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        self.link.send(data)
    }

    /// Raw passthrough read.
    pub fn recv(&mut self, max_bytes: usize) -> Result<Vec<u8>, DriverError> {
        self.link.recv(max_bytes)
    }

    /// Direct access to the driver link for protocol-specific work.
    pub fn link_mut(&mut self) -> &mut dyn Link {
        self.link.as_mut()
    }

    pub(crate) fn mark_idle(&mut self) {
        self.idle_since = Instant::now();
    }

    pub(crate) fn close(mut self) {
        self.link.close();
        tracing::debug!(handle = self.id, "closed connection");
    }
}
