//! Target server descriptors.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Backend family of a target server.
///
/// Dispatch is closed over this enum; the string form exists only for
/// configuration files and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Relational backend, spoken over the PostgreSQL wire protocol.
    Postgres,
    /// Column-store backend, spoken over the Cassandra native protocol.
    Cassandra,
}

impl BackendKind {
    /// String tag for logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Cassandra => "cassandra",
        }
    }

    /// Parse a configuration tag. Unknown tags are a configuration error,
    /// raised before any pool interaction.
    pub fn parse(tag: &str) -> Result<Self, EngineError> {
        match tag.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "cassandra" | "cql" => Ok(Self::Cassandra),
            other => Err(EngineError::configuration(format!("unknown backend type '{other}'"))),
        }
    }

    /// Default port for this backend family.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Cassandra => 9042,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved descriptor of a target endpoint.
///
/// Constructed per logical target from environment configuration at request
/// time and treated as immutable for the duration of one operation.
///
/// Equality and hashing cover identity-relevant fields only (backend, host,
/// port, credentials, database), so an equal `Server` always maps to the same
/// pool entry; the timeout overrides do not participate in identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct Server {
    /// Backend family, used for driver dispatch.
    pub backend: BackendKind,
    /// Server hostname or IP.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login username. Empty means unauthenticated.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Database name (relational) or keyspace (column store).
    pub database: String,
    /// Per-target connect timeout override, seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Per-target execution timeout override, seconds.
    pub execute_timeout_secs: Option<u64>,
    /// Backend-specific extras (not part of identity).
    #[serde(default)]
    pub extras: HashMap<String, String>,
}

impl Server {
    /// Create a descriptor with the backend's default port and no credentials.
    pub fn new(
        backend: BackendKind,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            host: host.into(),
            port: backend.default_port(),
            username: username.into(),
            password: String::new(),
            database: database.into(),
            connect_timeout_secs: None,
            execute_timeout_secs: None,
            extras: HashMap::new(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the connect timeout override, seconds.
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Set the execution timeout override, seconds.
    pub fn with_execute_timeout(mut self, secs: u64) -> Self {
        self.execute_timeout_secs = Some(secs);
        self
    }

    /// Attach a backend-specific extra.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Endpoint string for logs. Never includes the password.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend
            && self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.password == other.password
            && self.database == other.database
    }
}

impl Eq for Server {}

impl Hash for Server {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.backend.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        self.username.hash(state);
        self.password.hash(state);
        self.database.hash(state);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("execute_timeout_secs", &self.execute_timeout_secs)
            .finish()
    }
}
