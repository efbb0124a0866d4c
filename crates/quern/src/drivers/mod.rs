//! Execution drivers, one per backend family.
//!
//! - `postgres` - relational backend over tokio-postgres / deadpool-postgres
//! - `cassandra` - column store over the scylla driver
//! - `registry` - backend-tag -> driver dispatch
//!
//! Shared here: the [`ExecutionDriver`] contract, the bounded-worker
//! submission helper with its hard timeout, and the per-driver background
//! sweeper task.

use crate::error::EngineError;
use crate::models::{ResultTable, Server};
use crate::pool::{ConnectionPool, Connector};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub mod cassandra;
pub mod postgres;
pub mod registry;

pub use cassandra::CassandraDriver;
pub use postgres::PostgresDriver;
pub use registry::DriverRegistry;

/// Hook invoked with the observed row count of each successful query,
/// consumed by an external telemetry aggregator.
pub type RowCountHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Outcome of a stored-procedure call.
///
/// Returned only when the backend accepted and ran the statement; failures
/// surface as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureOutcome {
    /// Always `true` on the `Ok` path. Kept so callers porting from clients
    /// that report success in-band keep a stable shape.
    pub success: bool,
    /// Affected row count, when the backend reports one.
    pub rows_affected: Option<u64>,
}

/// Backend-family-specific query execution.
///
/// One instance per backend family owns its connection pool, its bounded
/// worker pool, and one background sweeper task. Instances must be
/// constructed inside a Tokio runtime.
#[async_trait]
pub trait ExecutionDriver: Send + Sync {
    /// Ensure a live handle exists for `server`, creating it on miss.
    ///
    /// The handle stays owned by the pool; this is the explicit form of the
    /// creation every execute performs implicitly.
    async fn connect(&self, server: &Server) -> Result<(), EngineError>;

    /// Execute a row-returning statement.
    ///
    /// `limit_records <= 0` disables the row limit; the returned table
    /// always carries the true pre-truncation row count.
    async fn execute_query(
        &self,
        server: &Server,
        query: &str,
        params: &crate::binder::Params,
        limit_records: i64,
    ) -> Result<ResultTable, EngineError>;

    /// Execute a statement and return the affected row count.
    async fn execute_update(
        &self,
        server: &Server,
        query: &str,
        params: &crate::binder::Params,
    ) -> Result<u64, EngineError>;

    /// Execute a stored procedure.
    async fn execute_procedure(
        &self,
        server: &Server,
        query: &str,
        params: &crate::binder::Params,
    ) -> Result<ProcedureOutcome, EngineError>;

    /// Backend tag this driver serves.
    fn driver_type(&self) -> &'static str;

    /// Number of live pool entries, for observability.
    fn pool_size(&self) -> usize;

    /// Stop the sweeper and close every pooled handle.
    async fn shutdown(&self);
}

impl std::fmt::Debug for dyn ExecutionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDriver")
            .field("driver_type", &self.driver_type())
            .finish()
    }
}

/// Run `work` on the shared bounded worker pool, waiting at most `timeout`.
///
/// The work is spawned as its own task with the caller's tracing span
/// attached, gated by the worker semaphore (waiters queue without bound).
/// When the timeout elapses the task is NOT aborted: it runs to completion
/// on its own and the result is discarded. That leak is deliberate,
/// mirroring the behavior callers have historically depended on.
pub(crate) async fn submit_bounded<T, F>(
    workers: Arc<Semaphore>,
    timeout: Duration,
    query: &str,
    work: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    let task: JoinHandle<Result<T, EngineError>> = tokio::spawn(
        async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| EngineError::internal("worker pool closed"))?;
            work.await
        }
        .instrument(span),
    );

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => {
            Err(EngineError::internal(format!("backend call task failed: {join_err}")))
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "timed out awaiting backend call; the call is left running"
            );
            Err(EngineError::timeout(timeout, query))
        }
    }
}

/// Handle to a driver's background sweep task.
pub(crate) struct Sweeper {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    /// Stop the sweep loop and wait for it to exit.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Start the recurring pool sweep for one driver instance: a fixed-delay
/// loop with the first pass at t=0, logging pool size before/after. Passive
/// access expiry alone would leave never-touched-again entries uncollected.
pub(crate) fn spawn_sweeper<C: Connector>(
    pool: Arc<ConnectionPool<C>>,
    interval: Duration,
    driver: &'static str,
) -> Sweeper {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = child.cancelled() => break,
                _ = ticker.tick() => {
                    let (before, after) = pool.sweep();
                    tracing::debug!(driver, before, after, "connection pool sweep");
                }
            }
        }
    });
    Sweeper { cancel, task: Mutex::new(Some(task)) }
}
