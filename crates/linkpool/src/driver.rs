//! Driver collaborator — how the pool opens, probes, and closes backend links.
//!
//! The pool never speaks a wire protocol itself. A [`Driver`] establishes a
//! [`Link`] to the configured [`Target`]; the pool only needs to know whether
//! a link is still alive and how to close it. Everything else (handshakes,
//! queries, auth) flows through [`Link::send`] / [`Link::recv`] untouched.
//!
//! ```text
//! ConnectionPool::start()
//!   → Driver::init()            (fatal on failure)
//!   → Driver::connect(&Target)  (per handle; failures retried by the replenisher)
//!       → Box<dyn Link>
//!           is_alive() / close() — used by the pool
//!           send() / recv()      — passthrough for callers
//! ```

pub mod tcp;

use std::fmt;

use crate::error::DriverError;

/// Address and credentials of the backing service.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl Target {
    /// `host:port` string suitable for socket address resolution.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Keep credentials out of logs.
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// One live connection to the backing service.
pub trait Link: Send + fmt::Debug {
    /// Liveness probe. Called on async worker threads, so it must return
    /// without waiting on the network.
    fn is_alive(&mut self) -> bool;
    /// Close the underlying transport. Called exactly once before the link is dropped.
    fn close(&mut self);
    /// Write raw bytes to the backend. Returns bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize, DriverError>;
    /// Read up to `max_bytes` raw bytes from the backend.
    fn recv(&mut self, max_bytes: usize) -> Result<Vec<u8>, DriverError>;
}

/// Factory for [`Link`]s — injected into the pool so tests can swap in mocks.
///
/// `connect` is a blocking call; the pool runs it off the async executor.
pub trait Driver: Send + Sync {
    /// One-time driver setup. A failure here aborts pool construction.
    fn init(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Establish a new link to `target`.
    fn connect(&self, target: &Target) -> Result<Box<dyn Link>, DriverError>;
}
