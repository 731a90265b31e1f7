//! Connection pool — construction, acquire, and shutdown.
//!
//! ```text
//! ConnectionPool::start(config, driver)
//!   → validate config, Driver::init()         (errors abort start-up)
//!   → open min_size handles                   (failures logged, not fatal)
//!   → spawn replenisher + reaper tasks
//!
//! acquire_timeout(t)
//!   → IdleRegistry::take_until(now + t)
//!     → handle            → PooledConnection (returns itself on drop)
//!     → deadline passed   → PoolError::AcquireTimeout
//!     → registry closed   → PoolError::Closed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::driver::{Driver, Target};
use crate::error::{DriverError, PoolError, PoolResult};
use crate::handle::ConnectionHandle;
use crate::registry::{IdleRegistry, Taken};
use crate::stats::PoolStats;
use crate::ticket::PooledConnection;
use crate::{reaper, replenisher};

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// State shared by the pool, its background tasks, and outstanding tickets.
pub(crate) struct Shared {
    pub(crate) config: PoolConfig,
    pub(crate) registry: IdleRegistry,
    driver: Arc<dyn Driver>,
    target: Arc<Target>,
    next_id: AtomicU64,
}

impl Shared {
    fn new(config: PoolConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            registry: IdleRegistry::new(config.max_size),
            target: Arc::new(config.target()),
            config,
            driver,
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect one new handle. The blocking driver call runs on the
    /// blocking thread pool.
    pub(crate) async fn open_handle(&self) -> Result<ConnectionHandle, DriverError> {
        let driver = Arc::clone(&self.driver);
        let target = Arc::clone(&self.target);
        let link = tokio::task::spawn_blocking(move || driver.connect(&target))
            .await
            .map_err(|e| DriverError::Connect {
                addr: self.target.addr(),
                reason: format!("connect task failed: {e}"),
            })??;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionHandle::new(id, link))
    }

    /// Release path for a ticket: back into the queue, or closed if broken,
    /// dead, or the pool has shut down.
    pub(crate) fn recycle(&self, mut handle: ConnectionHandle, broken: bool) {
        let id = handle.id();
        if broken || (self.config.test_on_release && !handle.is_alive()) {
            tracing::debug!(handle = id, broken, "discarding connection on release");
            self.destroy(handle);
            return;
        }
        match self.registry.put(handle) {
            Ok(idle) => tracing::debug!(handle = id, idle, "returned connection to pool"),
            Err(handle) => {
                tracing::debug!(handle = id, "pool shut down, closing returned connection");
                handle.close();
            }
        }
    }

    /// Close an on-loan handle and uncount it.
    fn destroy(&self, handle: ConnectionHandle) {
        self.registry.discard();
        handle.close();
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("target", &self.target)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// A bounded pool of backend connections.
///
/// Construct once with [`start`](Self::start) and share by reference or
/// `Arc`. Borrow with [`acquire`](Self::acquire); the returned
/// [`PooledConnection`] goes back to the pool when dropped. Call
/// [`shutdown`](Self::shutdown) to stop the background tasks and close every
/// idle handle; dropping the pool without it signals the tasks and closes
/// idle handles but does not wait for the tasks to finish.
pub struct ConnectionPool {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Validate `config`, initialize `driver`, open `min_size` handles, and
    /// start the replenisher and reaper.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(config: PoolConfig, driver: Arc<dyn Driver>) -> PoolResult<Self> {
        config.validate()?;
        driver.init().map_err(|e| {
            tracing::warn!(error = %e, "driver initialization failed");
            PoolError::Init(e)
        })?;

        let shared = Arc::new(Shared::new(config, driver));

        for _ in 0..shared.config.min_size {
            match shared.open_handle().await {
                Ok(handle) => {
                    if let Err(handle) = shared.registry.admit(handle) {
                        handle.close();
                    }
                }
                Err(e) => {
                    shared.registry.record_connect_failure();
                    tracing::warn!(error = %e, "failed to open initial connection");
                }
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(replenisher::run(Arc::clone(&shared), shutdown_rx.clone())),
            tokio::spawn(reaper::run(Arc::clone(&shared), shutdown_rx)),
        ];

        tracing::info!(
            target = %shared.target.addr(),
            database = %shared.target.database,
            min_size = shared.config.min_size,
            max_size = shared.config.max_size,
            opened = shared.registry.total(),
            "connection pool started"
        );

        Ok(Self {
            shared,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Borrow a handle, waiting up to the configured `acquire_timeout`.
    pub async fn acquire(&self) -> PoolResult<PooledConnection> {
        self.acquire_timeout(self.shared.config.acquire_timeout)
            .await
    }

    /// Borrow a handle, waiting up to `timeout` for one to become idle.
    ///
    /// Handles are handed out oldest-idle first. With `test_on_acquire` a
    /// dead handle is closed and the wait continues against the same deadline.
    pub async fn acquire_timeout(&self, timeout: Duration) -> PoolResult<PooledConnection> {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);

        loop {
            match self.shared.registry.take_until(deadline).await {
                Taken::Handle(mut handle) => {
                    if self.shared.config.test_on_acquire && !handle.is_alive() {
                        tracing::debug!(handle = handle.id(), "discarding dead idle connection");
                        self.shared.destroy(handle);
                        continue;
                    }
                    tracing::debug!(
                        handle = handle.id(),
                        idle_for = ?handle.idle_for(),
                        "checked out connection"
                    );
                    return Ok(PooledConnection::new(handle, Arc::clone(&self.shared)));
                }
                Taken::TimedOut => {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(
                        timeout_ms,
                        total = self.shared.registry.total(),
                        max_size = self.shared.config.max_size,
                        "timed out waiting for connection"
                    );
                    return Err(PoolError::AcquireTimeout { timeout_ms });
                }
                Taken::Closed => return Err(PoolError::Closed),
            }
        }
    }

    /// Borrow the oldest idle handle without waiting.
    ///
    /// Returns `None` when the queue is empty or the pool has shut down. Does
    /// not register demand, so the pool never grows on behalf of this call.
    pub fn try_acquire(&self) -> Option<PooledConnection> {
        let handle = self.shared.registry.try_take()?;
        Some(PooledConnection::new(handle, Arc::clone(&self.shared)))
    }

    /// Total handles owned by the pool (idle + on loan).
    pub fn size(&self) -> usize {
        self.shared.registry.total()
    }

    /// Handles currently idle.
    pub fn idle_count(&self) -> usize {
        self.shared.registry.idle_len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        self.shared.registry.stats()
    }

    /// The configuration the pool was started with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shared.registry.is_closed()
    }

    /// Run one reaper pass immediately. Returns the number of handles closed.
    pub fn reap_now(&self) -> usize {
        reaper::reap_once(&self.shared)
    }

    /// Stop background tasks and close every idle handle.
    ///
    /// Idempotent. Handles still on loan are closed when their tickets drop.
    /// A driver connect already in flight is not interrupted, so this can
    /// wait up to the configured `connect_timeout` for the replenisher to
    /// stop; the handle it produces is closed.
    pub async fn shutdown(&self) {
        let Some(idle) = self.shared.registry.close() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "pool background task ended abnormally");
            }
        }

        let closed = idle.len();
        for handle in idle {
            handle.close();
        }
        tracing::info!(
            closed,
            on_loan = self.shared.registry.total(),
            "connection pool shut down"
        );
    }

    /// Log pool statistics at `tracing::info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            total = stats.total,
            idle = stats.idle,
            active = stats.active,
            waiting = stats.waiting,
            created = stats.created,
            reaped = stats.reaped,
            discarded = stats.discarded,
            connect_failures = stats.connect_failures,
            timeouts = stats.timeouts,
            "pool statistics"
        );
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(idle) = self.shared.registry.close() {
            for handle in idle {
                handle.close();
            }
        }
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait) ────────────────

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("target", &self.shared.target)
            .field("min_size", &self.shared.config.min_size)
            .field("max_size", &self.shared.config.max_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Link;
    use crate::error::ConfigError;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    // ── Mock link and driver ─────────────────────────────────────────

    #[derive(Debug)]
    struct MockLink {
        alive: Arc<AtomicBool>,
        closes: Arc<AtomicU64>,
    }

    impl Link for MockLink {
        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn send(&mut self, data: &[u8]) -> Result<usize, DriverError> {
            Ok(data.len())
        }

        fn recv(&mut self, _max_bytes: usize) -> Result<Vec<u8>, DriverError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MockDriver {
        connects: AtomicU64,
        closes: Arc<AtomicU64>,
        should_fail: AtomicBool,
        connect_delay: Duration,
        fail_init: bool,
        links: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl MockDriver {
        fn connects(&self) -> u64 {
            self.connects.load(Ordering::SeqCst)
        }

        fn closes(&self) -> u64 {
            self.closes.load(Ordering::SeqCst)
        }

        /// Liveness flag of the n-th link ever opened (0-based).
        fn link_flag(&self, n: usize) -> Arc<AtomicBool> {
            Arc::clone(&self.links.lock().unwrap()[n])
        }
    }

    impl Driver for MockDriver {
        fn init(&self) -> Result<(), DriverError> {
            if self.fail_init {
                return Err(DriverError::Init("client library missing".to_string()));
            }
            Ok(())
        }

        fn connect(&self, target: &Target) -> Result<Box<dyn Link>, DriverError> {
            std::thread::sleep(self.connect_delay);
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(DriverError::Connect {
                    addr: target.addr(),
                    reason: "connection refused".to_string(),
                });
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let alive = Arc::new(AtomicBool::new(true));
            self.links.lock().unwrap().push(Arc::clone(&alive));
            Ok(Box::new(MockLink {
                alive,
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn test_config() -> PoolConfig {
        PoolConfig::default()
            .with_backend("db.test.local", 3306)
            .with_credentials("app", Some("secret"), "orders")
            .with_size(2, 4)
            .with_acquire_timeout(Duration::from_millis(500))
            .with_retry_backoff(Duration::from_millis(10), Duration::from_millis(40))
    }

    async fn make_pool(config: PoolConfig) -> (ConnectionPool, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::default());
        let pool = ConnectionPool::start(config, driver.clone()).await.unwrap();
        (pool, driver)
    }

    // ── Start-up ────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_opens_min_size_handles() {
        let (pool, driver) = make_pool(test_config()).await;
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(driver.connects(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn start_with_zero_min_opens_nothing() {
        let (pool, driver) = make_pool(test_config().with_size(0, 2)).await;
        assert_eq!(pool.size(), 0);
        assert_eq!(driver.connects(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn start_rejects_invalid_config() {
        let driver = Arc::new(MockDriver::default());
        let err = ConnectionPool::start(test_config().with_size(3, 1), driver.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Config(ConfigError::Invalid(_))));
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn start_propagates_driver_init_failure() {
        let driver = Arc::new(MockDriver {
            fail_init: true,
            ..MockDriver::default()
        });
        let err = ConnectionPool::start(test_config(), driver.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Init(DriverError::Init(_))));
        assert!(err.to_string().contains("client library missing"));
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn start_survives_unreachable_backend() {
        let driver = Arc::new(MockDriver::default());
        driver.should_fail.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::start(test_config(), driver.clone())
            .await
            .unwrap();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.stats().connect_failures, 2);
        pool.shutdown().await;
    }

    // ── Acquire / release ───────────────────────────────────────────

    #[tokio::test]
    async fn acquire_hands_out_oldest_idle_first() {
        let (pool, _) = make_pool(test_config()).await;
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        drop(first);
        drop(second);
        // Returned in order 1, 2, so handed out again in that order.
        assert_eq!(pool.acquire().await.unwrap().id(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_ticket_returns_handle() {
        let (pool, driver) = make_pool(test_config()).await;
        {
            let conn = pool.acquire().await.unwrap();
            assert_eq!(pool.idle_count(), 1);
            assert_eq!(pool.stats().active, 1);
            assert!(conn.age() < Duration::from_secs(5));
        }
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.size(), 2);
        assert_eq!(driver.closes(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn explicit_release_returns_handle() {
        let (pool, _) = make_pool(test_config()).await;
        let conn = pool.acquire().await.unwrap();
        conn.release();
        assert_eq!(pool.idle_count(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn ticket_returns_handle_on_error_path() {
        async fn failing_work(pool: &ConnectionPool) -> Result<(), String> {
            let mut conn = pool.acquire().await.map_err(|e| e.to_string())?;
            conn.send(b"UPDATE t SET x = 1").map_err(|e| e.to_string())?;
            Err("constraint violated".to_string())
        }

        let (pool, _) = make_pool(test_config()).await;
        assert!(failing_work(&pool).await.is_err());
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.size(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn try_acquire_never_waits() {
        let (pool, driver) = make_pool(test_config()).await;
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(pool.try_acquire().is_none());
        drop(a);
        assert!(pool.try_acquire().is_some());
        assert_eq!(driver.connects(), 2);
        drop(b);
        pool.shutdown().await;
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test]
    async fn borrow_release_cycles_keep_total_stable() {
        let (pool, driver) = make_pool(test_config()).await;
        for _ in 0..50 {
            let conn = pool.acquire().await.unwrap();
            assert!(conn.id() == 1 || conn.id() == 2);
            drop(conn);
            assert_eq!(pool.size(), 2);
            assert_eq!(pool.idle_count(), 2);
        }
        assert_eq!(driver.connects(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn passthrough_reaches_link() {
        let (pool, _) = make_pool(test_config()).await;
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.send(b"PING").unwrap(), 4);
        assert!(conn.recv(16).unwrap().is_empty());
        assert!(conn.link_mut().is_alive());
        drop(conn);
        pool.shutdown().await;
    }

    // ── Exhaustion / growth ─────────────────────────────────────────

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let (pool, _) = make_pool(test_config().with_size(1, 1)).await;
        let _held = pool.acquire().await.unwrap();

        let start = Instant::now();
        let err = pool
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, PoolError::AcquireTimeout { timeout_ms: 50 }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(pool.stats().timeouts, 1);
        assert_eq!(pool.stats().waiting, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn waiter_is_served_by_release() {
        let (pool, driver) = make_pool(test_config().with_size(1, 1)).await;
        let pool = Arc::new(pool);
        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.acquire_timeout(Duration::from_secs(2))
                    .await
                    .map(|conn| conn.id())
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
        assert_eq!(driver.connects(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn demand_grows_pool_up_to_max() {
        let (pool, driver) = make_pool(test_config()).await;
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.size(), 4);
        assert_eq!(driver.connects(), 4);

        // At max: a fifth borrower cannot be served.
        let err = pool
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout { .. }));
        assert_eq!(pool.size(), 4);
        assert_eq!(driver.connects(), 4);

        let ids: HashSet<u64> = held.iter().map(|c| c.id()).collect();
        assert_eq!(ids.len(), 4);
        drop(held);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_waiters_on_empty_pool_are_all_served() {
        let (pool, driver) = make_pool(test_config().with_size(0, 4)).await;
        let pool = Arc::new(pool);

        let borrowers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let conn = pool.acquire_timeout(Duration::from_millis(500)).await?;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<u64, PoolError>(conn.id())
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for borrower in borrowers {
            ids.insert(borrower.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 4);
        assert_eq!(pool.size(), 4);
        assert_eq!(driver.connects(), 4);
        assert_eq!(pool.stats().timeouts, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unbounded_timeout_does_not_overflow() {
        let (pool, _) = make_pool(test_config()).await;
        let conn = pool.acquire_timeout(Duration::MAX).await.unwrap();
        assert_eq!(conn.id(), 1);
        drop(conn);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unbounded_timeout_still_waits_for_release() {
        let (pool, _) = make_pool(test_config().with_size(1, 1)).await;
        let pool = Arc::new(pool);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_timeout(Duration::MAX).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn no_growth_without_waiters() {
        let (pool, driver) = make_pool(test_config()).await;
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Queue is empty but nobody is waiting, so nothing is opened.
        assert_eq!(pool.size(), 2);
        assert_eq!(driver.connects(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn replenisher_retries_after_connect_failure() {
        let (pool, driver) = make_pool(test_config().with_size(0, 2)).await;
        driver.should_fail.store(true, Ordering::SeqCst);

        let err = pool
            .acquire_timeout(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout { .. }));
        assert!(pool.stats().connect_failures >= 1);

        driver.should_fail.store(false, Ordering::SeqCst);
        let conn = pool.acquire_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(pool.size(), 1);
        drop(conn);
        pool.shutdown().await;
    }

    // ── Broken / dead handles ───────────────────────────────────────

    #[tokio::test]
    async fn broken_ticket_is_discarded() {
        let (pool, driver) = make_pool(test_config()).await;
        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        assert!(conn.is_broken());
        drop(conn);

        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.stats().discarded, 1);
        assert_eq!(driver.closes(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn dead_handle_discarded_on_release_when_probing() {
        let config = test_config().with_liveness_checks(false, true);
        let (pool, driver) = make_pool(config).await;
        let conn = pool.acquire().await.unwrap();
        driver.link_flag(0).store(false, Ordering::SeqCst);
        drop(conn);

        assert_eq!(pool.size(), 1);
        assert_eq!(driver.closes(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn dead_idle_handle_skipped_on_acquire_when_probing() {
        let config = test_config().with_liveness_checks(true, false);
        let (pool, driver) = make_pool(config).await;
        driver.link_flag(0).store(false, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), 2);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.stats().discarded, 1);
        assert_eq!(driver.closes(), 1);
        drop(conn);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn dead_handle_recirculates_without_probing() {
        let (pool, driver) = make_pool(test_config()).await;
        let conn = pool.acquire().await.unwrap();
        driver.link_flag(0).store(false, Ordering::SeqCst);
        drop(conn);
        assert_eq!(pool.size(), 2);
        assert_eq!(driver.closes(), 0);
        pool.shutdown().await;
    }

    // ── Reaping ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn reap_now_respects_min_size() {
        let config = test_config()
            .with_idle_reaping(Duration::from_millis(20), Duration::from_secs(60));
        let (pool, driver) = make_pool(config).await;

        let held: Vec<_> = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        assert_eq!(pool.size(), 3);
        drop(held);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(pool.reap_now(), 1);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.stats().reaped, 1);
        assert_eq!(driver.closes(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn reaper_task_shrinks_idle_surplus() {
        let config = test_config()
            .with_idle_reaping(Duration::from_millis(50), Duration::from_millis(20));
        let (pool, _) = make_pool(config).await;

        let held: Vec<_> = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        drop(held);
        assert_eq!(pool.size(), 3);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
        pool.shutdown().await;
    }

    // ── Shutdown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_closes_idle_and_rejects_acquire() {
        let (pool, driver) = make_pool(test_config()).await;
        pool.shutdown().await;

        assert!(pool.is_shut_down());
        assert_eq!(pool.size(), 0);
        assert_eq!(driver.closes(), 2);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_connect_and_closes_it() {
        let driver = Arc::new(MockDriver {
            connect_delay: Duration::from_millis(200),
            ..MockDriver::default()
        });
        let pool = ConnectionPool::start(test_config().with_size(0, 2), driver.clone())
            .await
            .unwrap();

        // The waiter gives up long before the replenisher's connect finishes.
        let err = pool
            .acquire_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout { .. }));

        pool.shutdown().await;
        assert_eq!(driver.connects(), 1);
        assert_eq!(driver.closes(), 1);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (pool, driver) = make_pool(test_config()).await;
        pool.shutdown().await;
        pool.shutdown().await;
        assert_eq!(driver.closes(), 2);
    }

    #[tokio::test]
    async fn ticket_released_after_shutdown_is_closed() {
        let (pool, driver) = make_pool(test_config()).await;
        let conn = pool.acquire().await.unwrap();
        pool.shutdown().await;
        assert_eq!(pool.size(), 1);

        drop(conn);
        assert_eq!(pool.size(), 0);
        assert_eq!(driver.closes(), 2);
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_acquirer() {
        let (pool, _) = make_pool(test_config().with_size(1, 1)).await;
        let pool = Arc::new(pool);
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown().await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn dropping_pool_closes_idle_handles() {
        let (pool, driver) = make_pool(test_config()).await;
        drop(pool);
        assert_eq!(driver.closes(), 2);
    }

    // ── Stats / Debug ───────────────────────────────────────────────

    #[tokio::test]
    async fn stats_track_lifecycle() {
        let (pool, _) = make_pool(test_config()).await;
        let conn = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.utilization(), 0.5);
        drop(conn);
        pool.log_stats();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn debug_does_not_leak_password() {
        let (pool, _) = make_pool(test_config()).await;
        let rendered = format!("{pool:?}");
        assert!(rendered.contains("ConnectionPool"));
        assert!(rendered.contains("db.test.local"));
        assert!(!rendered.contains("secret"));
        pool.shutdown().await;
    }
}
