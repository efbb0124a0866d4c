//! Multi-backend query execution engine with self-managing connection pools.
//!
//! Turns a target-server descriptor plus a SQL/CQL statement with named
//! placeholders into a normalized tabular result, while managing connection
//! lifecycle, enforcing execution timeouts, and classifying failures:
//!
//! - **error**: typed failure taxonomy at the driver boundary
//! - **config**: engine tuning knobs with defaults
//! - **models**: server descriptors and result tables
//! - **binder**: named-placeholder parameter binding
//! - **pool**: keyed connection cache with access expiry and eviction-close
//! - **drivers**: per-backend execution, worker-pool timeouts, dispatch
//! - **logging**: structured logging setup
//!
//! Typical call path:
//!
//! ```no_run
//! use quern::{BackendKind, DriverRegistry, EngineConfig, Params, Server};
//!
//! # async fn run() -> Result<(), quern::EngineError> {
//! let registry = DriverRegistry::with_defaults(EngineConfig::default());
//! let server = Server::new(BackendKind::Postgres, "db.example", "app", "tester")
//!     .with_password("secret");
//! let driver = registry.driver_for(&server)?;
//! let table = driver.execute_query(&server, "SELECT 1", &Params::new(), 0).await?;
//! assert_eq!(driver.pool_size(), 1);
//! assert_eq!(table.columns().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod config;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod models;
pub mod pool;

pub use binder::{bind, BoundStatement, ParamValue, Params, PlaceholderStyle};
pub use config::EngineConfig;
pub use drivers::{
    CassandraDriver, DriverRegistry, ExecutionDriver, PostgresDriver, ProcedureOutcome,
    RowCountHook,
};
pub use error::EngineError;
pub use models::{BackendKind, ResultTable, Server};
