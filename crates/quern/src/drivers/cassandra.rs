//! Column-store execution driver over the scylla Cassandra driver.
//!
//! The pooled handle for one server identity is a `Session` (a cluster
//! handle maintaining its own node connections); all callers presenting an
//! equal `Server` share it.

use crate::binder::{self, BoundStatement, ParamValue, Params, PlaceholderStyle};
use crate::config::EngineConfig;
use crate::drivers::{
    spawn_sweeper, submit_bounded, ExecutionDriver, ProcedureOutcome, RowCountHook, Sweeper,
};
use crate::error::EngineError;
use crate::models::{result, ResultTable, Server};
use crate::pool::{ConnectionPool, Connector, PoolHandle};

use async_trait::async_trait;
use chrono::DateTime;
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::{CqlTimestamp, Counter};
use scylla::{Session, SessionBuilder};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

/// Pooled handle: one cluster session per distinct server identity.
pub struct CqlHandle {
    endpoint: String,
    session: Session,
}

impl PoolHandle for CqlHandle {
    /// Release the pool's reference to the session.
    ///
    /// The scylla session has no explicit close; node connections tear down
    /// when the last `Arc<CqlHandle>` drops. Callers holding a clone at
    /// eviction time keep the session alive until their call finishes, so
    /// teardown can lag the eviction by one in-flight request.
    fn close(&self) {
        tracing::debug!(endpoint = %self.endpoint, "releasing cluster session");
    }
}

struct CqlConnector {
    config: EngineConfig,
}

#[async_trait]
impl Connector for CqlConnector {
    type Handle = CqlHandle;

    async fn connect(&self, server: &Server) -> Result<CqlHandle, EngineError> {
        let mut builder = SessionBuilder::new()
            .known_node(format!("{}:{}", server.host, server.port))
            .connection_timeout(self.config.resolve_connect_timeout(server));
        if !server.username.is_empty() {
            builder = builder.user(&server.username, &server.password);
        }
        if !server.database.is_empty() {
            builder = builder.use_keyspace(&server.database, false);
        }
        let session = builder.build().await.map_err(EngineError::from_cql_connect)?;

        tracing::info!(endpoint = %server.endpoint(), "cluster session created");
        Ok(CqlHandle { endpoint: server.endpoint(), session })
    }
}

/// Execution driver for Cassandra-family backends.
pub struct CassandraDriver {
    pool: Arc<ConnectionPool<CqlConnector>>,
    workers: Arc<Semaphore>,
    config: EngineConfig,
    row_count_hook: Option<RowCountHook>,
    sweeper: Sweeper,
}

impl CassandraDriver {
    /// Create a driver and start its background pool sweep.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            CqlConnector { config: config.clone() },
            config.alive_length(),
        ));
        let sweeper = spawn_sweeper(pool.clone(), config.sweep_interval(), "cassandra");
        Self {
            pool,
            workers: Arc::new(Semaphore::new(config.max_workers)),
            config,
            row_count_hook: None,
            sweeper,
        }
    }

    /// Attach a hook reporting observed row counts of successful queries.
    pub fn with_row_count_hook(mut self, hook: RowCountHook) -> Self {
        self.row_count_hook = Some(hook);
        self
    }

    async fn run_statement(
        &self,
        server: &Server,
        query: &str,
        params: &Params,
        limit_records: i64,
    ) -> Result<ResultTable, EngineError> {
        let handle = self.pool.get(server).await?;
        let timeout = self.config.resolve_execute_timeout(server);
        let bound = binder::bind(query, params, PlaceholderStyle::Question)?;
        submit_bounded(self.workers.clone(), timeout, query, async move {
            let BoundStatement { sql, values, .. } = bound;
            let cql_values: Vec<Option<CqlValue>> = values.iter().map(to_cql).collect();
            let result = handle
                .session
                .query(sql.clone(), cql_values)
                .await
                .map_err(|e| EngineError::from_cql(e, &sql))?;
            let columns: Vec<String> =
                result.col_specs.iter().map(|spec| spec.name.clone()).collect();
            let rows = result.rows.unwrap_or_default();
            Ok(ResultTable::from_rows(
                columns,
                rows.into_iter().map(|row| row.columns.into_iter().map(format_cql_cell).collect()),
                limit_records,
            ))
        })
        .await
    }
}

#[async_trait]
impl ExecutionDriver for CassandraDriver {
    async fn connect(&self, server: &Server) -> Result<(), EngineError> {
        self.pool.get(server).await.map(|_| ())
    }

    async fn execute_query(
        &self,
        server: &Server,
        query: &str,
        params: &Params,
        limit_records: i64,
    ) -> Result<ResultTable, EngineError> {
        let query_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "execute_query",
            driver = self.driver_type(),
            %query_id,
            endpoint = %server.endpoint(),
        );
        async {
            let table = self.run_statement(server, query, params, limit_records).await?;
            if let Some(hook) = &self.row_count_hook {
                hook(table.size() as u64);
            }
            tracing::debug!(
                rows = table.size(),
                available = table.actual_size_before_limit(),
                "query completed"
            );
            Ok(table)
        }
        .instrument(span)
        .await
    }

    async fn execute_update(
        &self,
        server: &Server,
        query: &str,
        params: &Params,
    ) -> Result<u64, EngineError> {
        let query_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "execute_update",
            driver = self.driver_type(),
            %query_id,
            endpoint = %server.endpoint(),
        );
        async {
            self.run_statement(server, query, params, 0).await?;
            // The native protocol does not report affected row counts.
            tracing::debug!("update completed");
            Ok(0)
        }
        .instrument(span)
        .await
    }

    async fn execute_procedure(
        &self,
        _server: &Server,
        query: &str,
        _params: &Params,
    ) -> Result<ProcedureOutcome, EngineError> {
        Err(EngineError::execution(
            "stored procedures are not supported by the cassandra backend",
            query,
        ))
    }

    fn driver_type(&self) -> &'static str {
        "cassandra"
    }

    fn pool_size(&self) -> usize {
        self.pool.size()
    }

    async fn shutdown(&self) {
        self.sweeper.shutdown().await;
        self.pool.invalidate_all();
    }
}

fn to_cql(value: &ParamValue) -> Option<CqlValue> {
    match value {
        ParamValue::Text(v) => Some(CqlValue::Text(v.clone())),
        ParamValue::Int(v) => Some(CqlValue::BigInt(*v)),
        ParamValue::Float(v) => Some(CqlValue::Double(*v)),
        ParamValue::Bool(v) => Some(CqlValue::Boolean(*v)),
        ParamValue::Timestamp(v) => Some(CqlValue::Timestamp(CqlTimestamp(v.timestamp_millis()))),
        ParamValue::Uuid(v) => Some(CqlValue::Uuid(*v)),
        ParamValue::Null => None,
    }
}

/// Render one CQL cell as its display string.
///
/// Timestamps use the fixed GMT pattern; doubles keep the historical
/// truncated-integral rendering. Types without a dedicated rendering fall
/// back to their debug form.
fn format_cql_cell(value: Option<CqlValue>) -> String {
    let Some(value) = value else { return String::new() };
    match value {
        CqlValue::Ascii(v) | CqlValue::Text(v) => v,
        CqlValue::Boolean(v) => v.to_string(),
        CqlValue::TinyInt(v) => v.to_string(),
        CqlValue::SmallInt(v) => v.to_string(),
        CqlValue::Int(v) => v.to_string(),
        CqlValue::BigInt(v) => v.to_string(),
        CqlValue::Counter(Counter(v)) => v.to_string(),
        CqlValue::Float(v) => v.to_string(),
        CqlValue::Double(v) => result::format_double(v),
        CqlValue::Timestamp(CqlTimestamp(millis)) => match DateTime::from_timestamp_millis(millis)
        {
            Some(ts) => result::format_timestamp(ts),
            None => millis.to_string(),
        },
        CqlValue::Uuid(v) => v.to_string(),
        CqlValue::Inet(v) => v.to_string(),
        CqlValue::Empty => String::new(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_cell_renders_empty() {
        assert_eq!(format_cql_cell(None), "");
        assert_eq!(format_cql_cell(Some(CqlValue::Empty)), "");
    }

    #[test]
    fn timestamp_cell_uses_fixed_gmt_pattern() {
        // 2024-03-05T17:04:09Z
        let millis = 1_709_658_249_000;
        let rendered = format_cql_cell(Some(CqlValue::Timestamp(CqlTimestamp(millis))));
        assert_eq!(rendered, "2024-03-05 17:04:09");
    }

    #[test]
    fn double_cell_keeps_truncated_integral_rendering() {
        assert_eq!(format_cql_cell(Some(CqlValue::Double(42.9))), "42");
        assert_eq!(format_cql_cell(Some(CqlValue::Float(1.5))), "1.5");
    }

    #[test]
    fn null_param_serializes_as_unset_value() {
        assert_eq!(to_cql(&ParamValue::Null), None);
        assert_eq!(to_cql(&ParamValue::Int(7)), Some(CqlValue::BigInt(7)));
    }
}
