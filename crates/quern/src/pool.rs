//! Keyed connection pool with access-time expiry.
//!
//! Maps each distinct [`Server`] identity to at most one live handle.
//! Creation on miss is single-flight: concurrent misses for the same key
//! await one creation, and a creation failure is delivered to every waiter
//! without poisoning the entry for future attempts. Eviction (access expiry,
//! sweep, or invalidation) closes the handle before returning, close-quietly.
//!
//! The map lock is a `parking_lot::Mutex` and is never held across an await;
//! waiting happens on a per-entry `watch` channel.

use crate::error::EngineError;
use crate::models::Server;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// A live connection/cluster object owned by the pool entry that created it.
///
/// Only the pool may close a handle; callers never do. `close` must not
/// fail: implementations log problems and return.
pub trait PoolHandle: Send + Sync + 'static {
    /// Release the underlying resources. Called exactly once, at eviction.
    fn close(&self);
}

/// Creates handles for servers on pool miss.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The handle type this connector produces.
    type Handle: PoolHandle;

    /// Establish a new handle for `server`.
    async fn connect(&self, server: &Server) -> Result<Self::Handle, EngineError>;
}

type CreateResult<H> = Result<Arc<H>, Arc<EngineError>>;

enum Slot<H> {
    /// Creation in flight; waiters subscribe to the channel.
    Pending(watch::Receiver<Option<CreateResult<H>>>),
    /// Live handle plus the time it was last handed out.
    Ready { handle: Arc<H>, last_access: Instant },
}

/// Keyed cache of Server -> handle with access-based expiry.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    alive_length: Duration,
    entries: Mutex<HashMap<Server, Slot<C::Handle>>>,
}

/// Removes an abandoned pending entry if creation never completes, so a
/// caller dropped mid-create cannot wedge the key forever.
struct CreationGuard<'a, C: Connector> {
    pool: &'a ConnectionPool<C>,
    server: &'a Server,
    done: bool,
}

impl<C: Connector> Drop for CreationGuard<'_, C> {
    fn drop(&mut self) {
        if !self.done {
            self.pool.entries.lock().remove(self.server);
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool. Entries unaccessed for `alive_length` become eligible
    /// for eviction.
    pub fn new(connector: C, alive_length: Duration) -> Self {
        Self { connector, alive_length, entries: Mutex::new(HashMap::new()) }
    }

    /// Get the handle for `server`, creating it on miss.
    ///
    /// Every hit refreshes the entry's access time; a hit on an expired
    /// entry evicts it first and creates a fresh handle.
    pub async fn get(&self, server: &Server) -> Result<Arc<C::Handle>, EngineError> {
        loop {
            enum Action<H> {
                Wait(watch::Receiver<Option<CreateResult<H>>>),
                Create(watch::Sender<Option<CreateResult<H>>>),
                Evict(Arc<H>),
            }

            let action = {
                let mut entries = self.entries.lock();
                let expired = matches!(
                    entries.get(server),
                    Some(Slot::Ready { last_access, .. })
                        if last_access.elapsed() >= self.alive_length
                );
                if expired {
                    if let Some(Slot::Ready { handle, .. }) = entries.remove(server) {
                        Action::Evict(handle)
                    } else {
                        continue;
                    }
                } else {
                    match entries.get_mut(server) {
                        Some(Slot::Ready { handle, last_access }) => {
                            *last_access = Instant::now();
                            return Ok(handle.clone());
                        }
                        Some(Slot::Pending(rx)) => Action::Wait(rx.clone()),
                        None => {
                            let (tx, rx) = watch::channel(None);
                            entries.insert(server.clone(), Slot::Pending(rx));
                            Action::Create(tx)
                        }
                    }
                }
            };

            match action {
                Action::Evict(handle) => {
                    tracing::debug!(endpoint = %server.endpoint(), "evicting expired handle on access");
                    handle.close();
                    // Fall through and create a fresh handle.
                }
                Action::Wait(mut rx) => {
                    loop {
                        let outcome = rx.borrow().clone();
                        match outcome {
                            Some(Ok(handle)) => return Ok(handle),
                            Some(Err(cause)) => {
                                return Err(EngineError::pool(server.endpoint(), cause));
                            }
                            None => {
                                if rx.changed().await.is_err() {
                                    // Creator went away without an outcome; retry.
                                    break;
                                }
                            }
                        }
                    }
                }
                Action::Create(tx) => {
                    let mut guard = CreationGuard { pool: self, server, done: false };
                    match self.connector.connect(server).await {
                        Ok(handle) => {
                            let handle = Arc::new(handle);
                            self.entries.lock().insert(
                                server.clone(),
                                Slot::Ready { handle: handle.clone(), last_access: Instant::now() },
                            );
                            guard.done = true;
                            let _ = tx.send(Some(Ok(handle.clone())));
                            tracing::debug!(endpoint = %server.endpoint(), "created pooled handle");
                            return Ok(handle);
                        }
                        Err(err) => {
                            self.entries.lock().remove(server);
                            guard.done = true;
                            let cause = Arc::new(err);
                            let _ = tx.send(Some(Err(cause.clone())));
                            tracing::warn!(
                                endpoint = %server.endpoint(),
                                error = %cause,
                                "handle creation failed"
                            );
                            return Err(EngineError::pool(server.endpoint(), cause));
                        }
                    }
                }
            }
        }
    }

    /// Evict every entry whose access time has expired, closing each handle
    /// before returning. Returns (size before, size after).
    pub fn sweep(&self) -> (usize, usize) {
        let mut expired = Vec::new();
        let before;
        {
            let mut entries = self.entries.lock();
            before = entries.len();
            entries.retain(|server, slot| match slot {
                Slot::Ready { handle, last_access }
                    if last_access.elapsed() >= self.alive_length =>
                {
                    expired.push((server.endpoint(), handle.clone()));
                    false
                }
                _ => true,
            });
        }
        let after = before - expired.len();
        for (endpoint, handle) in expired {
            tracing::debug!(%endpoint, "evicting idle handle");
            handle.close();
        }
        (before, after)
    }

    /// Evict everything, closing every live handle.
    pub fn invalidate_all(&self) {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock();
            entries.drain().collect()
        };
        for (server, slot) in drained {
            if let Slot::Ready { handle, .. } = slot {
                tracing::debug!(endpoint = %server.endpoint(), "closing handle on invalidation");
                handle.close();
            }
        }
    }

    /// Number of entries currently in the pool.
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    #[derive(Debug)]
    struct MockHandle {
        closes: Arc<AtomicUsize>,
    }

    impl PoolHandle for MockHandle {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockConnector {
        creations: AtomicUsize,
        closes: Arc<AtomicUsize>,
        delay: Duration,
        fail: AtomicBool,
    }

    impl MockConnector {
        fn new() -> Self {
            Self {
                creations: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                fail: AtomicBool::new(false),
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self { delay, ..Self::new() }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Handle = MockHandle;

        async fn connect(&self, _server: &Server) -> Result<MockHandle, EngineError> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::connection("refused"));
            }
            Ok(MockHandle { closes: self.closes.clone() })
        }
    }

    fn server() -> Server {
        Server::new(BackendKind::Postgres, "db", "app", "u").with_password("pw")
    }

    fn pool(connector: MockConnector, alive: Duration) -> Arc<ConnectionPool<MockConnector>> {
        Arc::new(ConnectionPool::new(connector, alive))
    }

    #[tokio::test]
    async fn miss_creates_and_hit_reuses() {
        let pool = pool(MockConnector::new(), Duration::from_secs(60));
        let first = pool.get(&server()).await.unwrap();
        let second = pool.get(&server()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.connector.creations.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_create_exactly_one_handle() {
        let pool = pool(
            MockConnector::with_delay(Duration::from_millis(50)),
            Duration::from_secs(60),
        );
        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let pool = pool.clone();
            tasks.spawn(async move { pool.get(&server()).await.unwrap() });
        }
        let mut handles = Vec::new();
        while let Some(handle) = tasks.join_next().await {
            handles.push(handle.unwrap());
        }
        assert_eq!(pool.connector.creations.load(Ordering::SeqCst), 1);
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_handles() {
        let pool = pool(MockConnector::new(), Duration::from_secs(60));
        let a = pool.get(&server()).await.unwrap();
        let b = pool.get(&server().with_password("other")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn creation_failure_reaches_all_waiters_without_poisoning() {
        let connector = MockConnector::with_delay(Duration::from_millis(20));
        connector.fail.store(true, Ordering::SeqCst);
        let pool = pool(connector, Duration::from_secs(60));

        let mut tasks = JoinSet::new();
        for _ in 0..4 {
            let pool = pool.clone();
            tasks.spawn(async move { pool.get(&server()).await });
        }
        while let Some(result) = tasks.join_next().await {
            let err = result.unwrap().unwrap_err();
            assert_eq!(err.category(), "Pool");
        }
        // One creation attempt served every waiter.
        assert_eq!(pool.connector.creations.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 0);

        // The key is not poisoned: the next attempt succeeds.
        pool.connector.fail.store(false, Ordering::SeqCst);
        pool.get(&server()).await.unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_entries_and_closes_once() {
        let pool = pool(MockConnector::new(), Duration::from_millis(100));
        pool.get(&server()).await.unwrap();
        assert_eq!(pool.sweep(), (1, 1));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(pool.sweep(), (1, 0));
        // A second sweep finds nothing; the handle closed exactly once.
        assert_eq!(pool.sweep(), (0, 0));
        assert_eq!(pool.connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn access_extends_life() {
        let pool = pool(MockConnector::new(), Duration::from_millis(100));
        pool.get(&server()).await.unwrap();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(60)).await;
            pool.get(&server()).await.unwrap();
        }
        assert_eq!(pool.connector.creations.load(Ordering::SeqCst), 1);
        assert_eq!(pool.sweep(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_replaced_on_next_access() {
        let pool = pool(MockConnector::new(), Duration::from_millis(100));
        let first = pool.get(&server()).await.unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        let second = pool.get(&server()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.connector.creations.load(Ordering::SeqCst), 2);
        assert_eq!(pool.connector.closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn invalidate_all_closes_everything() {
        let pool = pool(MockConnector::new(), Duration::from_secs(60));
        pool.get(&server()).await.unwrap();
        pool.get(&server().with_password("other")).await.unwrap();
        pool.invalidate_all();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.connector.closes.load(Ordering::SeqCst), 2);
    }
}
