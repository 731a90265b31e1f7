//! Borrow ticket — scoped ownership of one pooled handle.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::handle::ConnectionHandle;
use crate::pool::Shared;

/// A handle on loan from a [`ConnectionPool`](crate::ConnectionPool).
///
/// Dereferences to [`ConnectionHandle`]. When the ticket goes out of scope, whether
/// by normal return, `?`, or unwinding, the handle is returned to the idle
/// queue exactly once. Call [`mark_broken`](Self::mark_broken) if the link is
/// known to be unusable; it is then closed instead of recirculated.
///
/// The ticket keeps the pool's shared state alive, so it may outlive the
/// `ConnectionPool` value; a handle released after shutdown is closed.
#[derive(Debug)]
pub struct PooledConnection {
    handle: Option<ConnectionHandle>,
    shared: Arc<Shared>,
    broken: bool,
}

impl PooledConnection {
    pub(crate) fn new(handle: ConnectionHandle, shared: Arc<Shared>) -> Self {
        Self {
            handle: Some(handle),
            shared,
            broken: false,
        }
    }

    /// Flag the link as unusable; release will close and discard it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether [`mark_broken`](Self::mark_broken) has been called.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Return the handle now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledConnection {
    type Target = ConnectionHandle;

    fn deref(&self) -> &ConnectionHandle {
        // Only `Drop` takes the handle out.
        self.handle.as_ref().expect("handle present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut ConnectionHandle {
        self.handle.as_mut().expect("handle present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.recycle(handle, self.broken);
        }
    }
}
