//! Backend-tag to driver dispatch.
//!
//! Dispatch is closed over [`BackendKind`], but the registry is populated by
//! explicit registration so embedders can swap or omit drivers. Asking for
//! an unregistered backend is a configuration error, raised before any pool
//! interaction.

use crate::config::EngineConfig;
use crate::drivers::{CassandraDriver, ExecutionDriver, PostgresDriver};
use crate::error::EngineError;
use crate::models::{BackendKind, Server};
use std::collections::HashMap;
use std::sync::Arc;

/// Selects the execution driver for a server's declared backend type.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<BackendKind, Arc<dyn ExecutionDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with both built-in drivers, sharing one config.
    ///
    /// Must be called inside a Tokio runtime (each driver starts its
    /// background sweep at construction).
    pub fn with_defaults(config: EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(BackendKind::Postgres, Arc::new(PostgresDriver::new(config.clone())));
        registry.register(BackendKind::Cassandra, Arc::new(CassandraDriver::new(config)));
        registry
    }

    /// Register (or replace) the driver for a backend family.
    pub fn register(&mut self, kind: BackendKind, driver: Arc<dyn ExecutionDriver>) -> &mut Self {
        self.drivers.insert(kind, driver);
        self
    }

    /// Select the driver for `server`.
    pub fn driver_for(&self, server: &Server) -> Result<Arc<dyn ExecutionDriver>, EngineError> {
        self.drivers.get(&server.backend).cloned().ok_or_else(|| {
            EngineError::configuration(format!(
                "no driver registered for backend '{}'",
                server.backend
            ))
        })
    }

    /// Shut down every registered driver, closing all pooled handles.
    pub async fn shutdown_all(&self) {
        for (kind, driver) in &self.drivers {
            tracing::info!(backend = %kind, "shutting down driver");
            driver.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Params;
    use crate::drivers::ProcedureOutcome;
    use crate::models::ResultTable;
    use async_trait::async_trait;

    struct StubDriver;

    #[async_trait]
    impl ExecutionDriver for StubDriver {
        async fn connect(&self, _server: &Server) -> Result<(), EngineError> {
            Ok(())
        }

        async fn execute_query(
            &self,
            _server: &Server,
            _query: &str,
            _params: &Params,
            _limit_records: i64,
        ) -> Result<ResultTable, EngineError> {
            Ok(ResultTable::empty(vec!["x".into()]))
        }

        async fn execute_update(
            &self,
            _server: &Server,
            _query: &str,
            _params: &Params,
        ) -> Result<u64, EngineError> {
            Ok(0)
        }

        async fn execute_procedure(
            &self,
            _server: &Server,
            _query: &str,
            _params: &Params,
        ) -> Result<ProcedureOutcome, EngineError> {
            Ok(ProcedureOutcome { success: true, rows_affected: None })
        }

        fn driver_type(&self) -> &'static str {
            "stub"
        }

        fn pool_size(&self) -> usize {
            0
        }

        async fn shutdown(&self) {}
    }

    #[test]
    fn unregistered_backend_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let server = Server::new(BackendKind::Cassandra, "db", "ks", "u");
        let err = registry.driver_for(&server).unwrap_err();
        assert_eq!(err.category(), "Configuration");
        assert!(err.to_string().contains("cassandra"));
    }

    #[test]
    fn registered_driver_is_selected_by_backend_tag() {
        let mut registry = DriverRegistry::new();
        registry.register(BackendKind::Postgres, Arc::new(StubDriver));
        let server = Server::new(BackendKind::Postgres, "db", "app", "u");
        assert_eq!(registry.driver_for(&server).unwrap().driver_type(), "stub");

        let other = Server::new(BackendKind::Cassandra, "db", "ks", "u");
        assert!(registry.driver_for(&other).is_err());
    }
}
