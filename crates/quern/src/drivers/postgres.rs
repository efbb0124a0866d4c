//! Relational execution driver over tokio-postgres / deadpool-postgres.
//!
//! The pooled handle for one server identity is a deadpool-postgres `Pool`;
//! all callers presenting an equal `Server` share it. Handle creation
//! validates connectivity with a test statement so credential problems
//! surface as pool failures, before any query runs.

use crate::binder::{self, BoundStatement, ParamValue, Params, PlaceholderStyle};
use crate::config::EngineConfig;
use crate::drivers::{
    spawn_sweeper, submit_bounded, ExecutionDriver, ProcedureOutcome, RowCountHook, Sweeper,
};
use crate::error::EngineError;
use crate::models::{result, ResultTable, Server};
use crate::pool::{ConnectionPool, Connector, PoolHandle};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Pooled handle: one client pool per distinct server identity.
pub struct PgHandle {
    endpoint: String,
    pool: Pool,
}

impl PoolHandle for PgHandle {
    fn close(&self) {
        self.pool.close();
        tracing::debug!(endpoint = %self.endpoint, "closed relational connection pool");
    }
}

struct PgConnector {
    config: EngineConfig,
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgHandle;

    async fn connect(&self, server: &Server) -> Result<PgHandle, EngineError> {
        let connect_timeout = self.config.resolve_connect_timeout(server);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&server.host);
        pg_config.port(server.port);
        pg_config.dbname(&server.database);
        pg_config.user(&server.username);
        pg_config.password(&server.password);
        pg_config.application_name("quern");
        pg_config.connect_timeout(connect_timeout);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(60));

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );

        let pool = Pool::builder(manager)
            .max_size(self.config.relational_pool_size)
            .create_timeout(Some(connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| EngineError::connection(format!("failed to build pool: {e}")))?;

        // Establish and validate one connection up front, so bad hosts and
        // bad credentials fail the creation, not the first query.
        let client = pool.get().await.map_err(classify_acquire)?;
        client
            .execute("SELECT 1", &[])
            .await
            .map_err(EngineError::from_pg_connect)?;

        tracing::info!(endpoint = %server.endpoint(), "relational connection pool created");
        Ok(PgHandle { endpoint: server.endpoint(), pool })
    }
}

fn classify_acquire(err: deadpool_postgres::PoolError) -> EngineError {
    match err {
        deadpool_postgres::PoolError::Backend(e) => EngineError::from_pg_connect(e),
        other => EngineError::connection_with_source("failed to acquire client", other),
    }
}

impl ToSql for ParamValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Self::Text(v) => v.to_sql(ty, out),
            Self::Int(v) => v.to_sql(ty, out),
            Self::Float(v) => v.to_sql(ty, out),
            Self::Bool(v) => v.to_sql(ty, out),
            Self::Timestamp(v) => v.to_sql(ty, out),
            Self::Uuid(v) => v.to_sql(ty, out),
            Self::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The backend type is inferred from the runtime value; mismatches
        // surface as execution errors from the server.
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

/// Execution driver for relational backends.
pub struct PostgresDriver {
    pool: Arc<ConnectionPool<PgConnector>>,
    workers: Arc<Semaphore>,
    config: EngineConfig,
    row_count_hook: Option<RowCountHook>,
    sweeper: Sweeper,
}

impl PostgresDriver {
    /// Create a driver and start its background pool sweep.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            PgConnector { config: config.clone() },
            config.alive_length(),
        ));
        let sweeper = spawn_sweeper(pool.clone(), config.sweep_interval(), "postgres");
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

    async fn run_bound<T, F, Fut>(
        &self,
        server: &Server,
        query: &str,
        params: &Params,
        call: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<PgHandle>, BoundStatement) -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.pool.get(server).await?;
        let timeout = self.config.resolve_execute_timeout(server);
        let bound = binder::bind(query, params, PlaceholderStyle::Numbered)?;
        submit_bounded(self.workers.clone(), timeout, query, call(handle, bound)).await
    }
}

#[async_trait]
impl ExecutionDriver for PostgresDriver {
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
            let table = self
                .run_bound(server, query, params, |handle, bound| async move {
                    let client = handle.pool.get().await.map_err(classify_acquire)?;
                    let stmt = client
                        .prepare(&bound.sql)
                        .await
                        .map_err(|e| EngineError::from_pg(e, &bound.sql))?;
                    let columns: Vec<String> =
                        stmt.columns().iter().map(|c| c.name().to_string()).collect();
                    let rows = client
                        .query(&stmt, &param_refs(&bound.values))
                        .await
                        .map_err(|e| EngineError::from_pg(e, &bound.sql))?;
                    Ok(ResultTable::from_rows(
                        columns,
                        rows.iter().map(format_row),
                        limit_records,
                    ))
                })
                .await?;
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
            let affected = self
                .run_bound(server, query, params, |handle, bound| async move {
                    let client = handle.pool.get().await.map_err(classify_acquire)?;
                    let stmt = client
                        .prepare(&bound.sql)
                        .await
                        .map_err(|e| EngineError::from_pg(e, &bound.sql))?;
                    client
                        .execute(&stmt, &param_refs(&bound.values))
                        .await
                        .map_err(|e| EngineError::from_pg(e, &bound.sql))
                })
                .await?;
            tracing::debug!(affected, "update completed");
            Ok(affected)
        }
        .instrument(span)
        .await
    }

    async fn execute_procedure(
        &self,
        server: &Server,
        query: &str,
        params: &Params,
    ) -> Result<ProcedureOutcome, EngineError> {
        let query_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "execute_procedure",
            driver = self.driver_type(),
            %query_id,
            endpoint = %server.endpoint(),
        );
        async {
            let affected = self
                .run_bound(server, query, params, |handle, bound| async move {
                    let client = handle.pool.get().await.map_err(classify_acquire)?;
                    let stmt = client
                        .prepare(&bound.sql)
                        .await
                        .map_err(|e| EngineError::from_pg(e, &bound.sql))?;
                    client
                        .execute(&stmt, &param_refs(&bound.values))
                        .await
                        .map_err(|e| EngineError::from_pg(e, &bound.sql))
                })
                .await?;
            tracing::debug!(affected, "procedure completed");
            Ok(ProcedureOutcome { success: true, rows_affected: Some(affected) })
        }
        .instrument(span)
        .await
    }

    fn driver_type(&self) -> &'static str {
        "postgres"
    }

    fn pool_size(&self) -> usize {
        self.pool.size()
    }

    async fn shutdown(&self) {
        self.sweeper.shutdown().await;
        self.pool.invalidate_all();
    }
}

fn param_refs(values: &[ParamValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn format_row(row: &Row) -> Vec<String> {
    (0..row.columns().len()).map(|idx| format_cell(row, idx)).collect()
}

/// Render one cell by its declared column type.
///
/// Timestamps use the fixed GMT pattern; 64-bit floats keep the historical
/// truncated-integral rendering (see `models::result::format_double`).
fn format_cell(row: &Row, idx: usize) -> String {
    let ty = row.columns()[idx].type_().clone();
    let rendered: Result<Option<String>, tokio_postgres::Error> = if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(|v| v.map(|b| b.to_string()))
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx).map(|v| v.map(|n| n.to_string()))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx).map(|v| v.map(|n| n.to_string()))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(|v| v.map(|n| n.to_string()))
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx).map(|v| v.map(|n| n.to_string()))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(|v| v.map(result::format_double))
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| v.map(result::format_naive_timestamp))
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx).map(|v| v.map(result::format_timestamp))
    } else if ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map(|d| d.format("%Y-%m-%d").to_string()))
    } else if ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(idx)
            .map(|v| v.map(|t| t.format("%H:%M:%S").to_string()))
    } else if ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx).map(|v| v.map(|u| u.to_string()))
    } else if ty == Type::JSON || ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx).map(|v| v.map(|j| j.to_string()))
    } else if ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)
            .map(|v| v.map(|bytes| bytes.iter().map(|b| format!("{b:02x}")).collect()))
    } else {
        row.try_get::<_, Option<String>>(idx)
    };

    match rendered {
        Ok(Some(text)) => text,
        Ok(None) => String::new(),
        Err(err) => {
            tracing::warn!(column = row.columns()[idx].name(), %err, "unrenderable cell");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_param_encodes_as_bigint() {
        let mut buf = BytesMut::new();
        let is_null = ParamValue::Int(7).to_sql(&Type::INT8, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(&buf[..], 7i64.to_be_bytes());
    }

    #[test]
    fn text_param_encodes_raw_utf8() {
        let mut buf = BytesMut::new();
        ParamValue::Text("abc".into()).to_sql(&Type::TEXT, &mut buf).unwrap();
        assert_eq!(&buf[..], b"abc");
    }

    #[test]
    fn null_param_writes_nothing() {
        let mut buf = BytesMut::new();
        let is_null = ParamValue::Null.to_sql(&Type::TEXT, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(buf.is_empty());
    }

    #[test]
    fn param_accepts_any_declared_type() {
        assert!(<ParamValue as ToSql>::accepts(&Type::INT8));
        assert!(<ParamValue as ToSql>::accepts(&Type::BYTEA));
    }
}
