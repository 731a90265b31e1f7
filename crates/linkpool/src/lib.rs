//! linkpool — bounded, self-managing pool of reusable backend connections.
//!
//! Callers borrow a connection with a deadline, use it, and the borrow ticket
//! returns it when dropped. Two background tasks keep the pool in shape:
//!
//! ```text
//! ConnectionPool
//!   ├── IdleRegistry (FIFO idle queue, total/waiter counts, counters)
//!   ├── Replenisher task (opens a handle when a borrower waits on an empty
//!   │                     queue and the pool is below max_size; backs off on
//!   │                     connect failure)
//!   ├── Reaper task (every reap_interval, closes handles idle longer than
//!   │                max_idle while above min_size)
//!   └── Driver (pluggable; TcpDriver ships with plain TCP and rustls TLS)
//! ```
//!
//! - **config**: [`PoolConfig`] with builder methods, legacy `key=value` and
//!   TOML loading
//! - **driver**: [`Driver`] / [`Link`] traits and the TCP implementation
//! - **pool**: [`ConnectionPool`] start-up, acquire, shutdown
//! - **ticket**: [`PooledConnection`], the scoped borrow
//! - **stats**: [`PoolStats`] counter snapshot

pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod pool;
pub mod stats;
pub mod ticket;

mod reaper;
mod registry;
mod replenisher;

pub use config::{PoolConfig, PoolFileConfig, PoolSection};
pub use driver::tcp::{TcpDriver, TcpLink};
pub use driver::{Driver, Link, Target};
pub use error::{ConfigError, DriverError, PoolError, PoolResult};
pub use handle::ConnectionHandle;
pub use pool::ConnectionPool;
pub use stats::PoolStats;
pub use ticket::PooledConnection;
