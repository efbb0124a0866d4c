//! Error types for the query execution engine.
//!
//! Every failure that crosses the driver boundary is one of the typed
//! variants below. The engine never retries on its own; classification is the
//! caller's signal for what to do next.

use scylla::transport::errors::{DbError, NewSessionError, QueryError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Handle creation through the connection pool failed.
    ///
    /// Surfaced to every caller that was waiting on the same creation,
    /// wrapping the shared underlying cause.
    #[error("pool error for {endpoint}: {message}")]
    Pool {
        /// Endpoint the handle was being created for.
        endpoint: String,
        /// Human-readable error message.
        message: String,
        /// Shared underlying cause (one creation, many waiters).
        #[source]
        source: Option<Arc<EngineError>>,
    },

    /// Network-level connection failure.
    #[error("connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend explicitly rejected the supplied credentials.
    #[error("authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// The bounded wait on a submitted backend call elapsed.
    ///
    /// The underlying call is not cancelled; it runs to its own completion
    /// and its result is discarded.
    #[error("query timed out after {timeout:?}")]
    Timeout {
        /// The resolved per-call timeout that elapsed.
        timeout: Duration,
        /// The query text, for diagnostics.
        query: String,
    },

    /// Any other backend-side error during prepare/execute.
    #[error("execution error: {message}")]
    Execution {
        /// Backend error message.
        message: String,
        /// The query text that failed.
        query: String,
        /// Backend error code (e.g. SQLSTATE), when available.
        code: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A named placeholder could not be resolved from the parameter map.
    ///
    /// Raised before any network call is made.
    #[error("parameter not found: {name}")]
    ParameterNotFound {
        /// The unresolved placeholder name.
        name: String,
    },

    /// Misconfiguration detected before any pool interaction.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error (worker task failures and the like).
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

impl EngineError {
    // ========== Constructors ==========

    /// Create a pool failure wrapping the shared creation error.
    pub fn pool(endpoint: impl Into<String>, cause: Arc<EngineError>) -> Self {
        Self::Pool {
            endpoint: endpoint.into(),
            message: cause.to_string(),
            source: Some(cause),
        }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            hint: Some("check username and password".to_string()),
        }
    }

    /// Create a timeout error for the given query.
    pub fn timeout(timeout: Duration, query: impl Into<String>) -> Self {
        Self::Timeout { timeout, query: query.into() }
    }

    /// Create an execution error carrying the query text.
    pub fn execution(message: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Execution { message: message.into(), query: query.into(), code: None, source: None }
    }

    /// Create a parameter-not-found error.
    pub fn parameter_not_found(name: impl Into<String>) -> Self {
        Self::ParameterNotFound { name: name.into() }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    // ========== Methods ==========

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is an authentication failure.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Pool { .. } => "Pool",
            Self::Connection { .. } => "Connection",
            Self::Authentication { .. } => "Authentication",
            Self::Timeout { .. } => "Timeout",
            Self::Execution { .. } => "Execution",
            Self::ParameterNotFound { .. } => "Parameter",
            Self::Configuration { .. } => "Configuration",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get the query text attached to this error, if any.
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Timeout { query, .. } | Self::Execution { query, .. } => Some(query),
            _ => None,
        }
    }

    // ========== Backend classification ==========

    /// Classify a relational backend error raised during prepare/execute.
    ///
    /// SQLSTATE 28P01/28000 are credential rejections, class 08 is a broken
    /// connection, everything else is an execution failure carrying the query
    /// text.
    pub fn from_pg(err: tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code = db_err.code().code().to_string();
            return match code.as_str() {
                "28P01" => Self::Authentication {
                    message,
                    hint: Some("invalid password - check your credentials".to_string()),
                },
                "28000" => Self::Authentication {
                    message,
                    hint: Some("authentication failed - check username and permissions".to_string()),
                },
                _ if code.starts_with("08") => {
                    Self::Connection { message, source: Some(Box::new(err)) }
                }
                _ => Self::Execution {
                    message,
                    query: query.to_string(),
                    code: Some(code),
                    source: Some(Box::new(err)),
                },
            };
        }

        if err.is_closed() {
            return Self::Connection {
                message: "connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        Self::Execution {
            message: err.to_string(),
            query: query.to_string(),
            code: None,
            source: Some(Box::new(err)),
        }
    }

    /// Classify a relational backend error raised while establishing a
    /// connection. Never an execution failure: there is no query yet.
    pub fn from_pg_connect(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code = db_err.code().code();
            if code == "28P01" || code == "28000" {
                return Self::Authentication {
                    message,
                    hint: Some("check backend credentials".to_string()),
                };
            }
            return Self::Connection { message, source: Some(Box::new(err)) };
        }
        Self::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }

    /// Classify a CQL backend error raised during execute.
    pub fn from_cql(err: QueryError, query: &str) -> Self {
        match err {
            QueryError::DbError(DbError::AuthenticationError, message)
            | QueryError::DbError(DbError::Unauthorized, message) => Self::Authentication {
                message,
                hint: Some("check backend credentials and permissions".to_string()),
            },
            other => {
                let message = other.to_string();
                Self::Execution {
                    message,
                    query: query.to_string(),
                    code: None,
                    source: Some(Box::new(other)),
                }
            }
        }
    }

    /// Classify a CQL session construction failure.
    pub fn from_cql_connect(err: NewSessionError) -> Self {
        let message = err.to_string();
        if message.to_ascii_lowercase().contains("auth") {
            return Self::Authentication {
                message,
                hint: Some("check backend credentials".to_string()),
            };
        }
        Self::Connection { message, source: Some(Box::new(err)) }
    }
}
