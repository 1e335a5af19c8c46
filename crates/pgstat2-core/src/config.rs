//! Collector configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::gather::Compatibility;

/// Default connection address, matching a local superuser without TLS.
pub const DEFAULT_ADDRESS: &str = "host=localhost user=postgres sslmode=disable";

/// Connection parameters that must never end up in the `server` tag.
const SECRET_KEYS: &[&str] = &[
    "password",
    "sslcert",
    "sslkey",
    "sslrootcert",
    "sslpassword",
];

/// Error type for configuration resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Both an allow-list and a deny-list of databases were given.
    ConflictingDatabaseFilters,
    /// The connection address is empty.
    EmptyAddress,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ConflictingDatabaseFilters => {
                write!(f, "databases and ignored_databases cannot be used together")
            }
            ConfigError::EmptyAddress => write!(f, "connection address is empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which databases metrics are gathered for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DatabaseFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
    Except(BTreeSet<String>),
}

impl DatabaseFilter {
    /// Returns true if rows for `database` should be kept.
    ///
    /// Rows that are not bound to any database (empty name) always pass.
    pub fn allows(&self, database: &str) -> bool {
        if database.is_empty() {
            return true;
        }
        match self {
            DatabaseFilter::All => true,
            DatabaseFilter::Only(names) => names.contains(database),
            DatabaseFilter::Except(names) => !names.contains(database),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, DatabaseFilter::All)
    }
}

/// Settings for one monitored server.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// libpq key=value string or `postgres://` URL.
    pub address: String,
    /// Value of the `server` tag. Derived from `address` when unset.
    pub output_address: Option<String>,
    /// Only gather these databases.
    pub databases: Vec<String>,
    /// Gather every database except these.
    pub ignored_databases: Vec<String>,
    /// Connections older than this are reopened. Zero keeps them forever.
    pub max_lifetime: Duration,
    /// The address points at a transaction-pooling proxy (pgbouncer).
    pub pgbouncer: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            output_address: None,
            databases: Vec::new(),
            ignored_databases: Vec::new(),
            max_lifetime: Duration::ZERO,
            pgbouncer: false,
        }
    }
}

impl CollectorConfig {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Checks the settings that cannot be combined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        self.database_filter().map(|_| ())
    }

    pub fn database_filter(&self) -> Result<DatabaseFilter, ConfigError> {
        match (self.databases.is_empty(), self.ignored_databases.is_empty()) {
            (true, true) => Ok(DatabaseFilter::All),
            (false, true) => Ok(DatabaseFilter::Only(
                self.databases.iter().cloned().collect(),
            )),
            (true, false) => Ok(DatabaseFilter::Except(
                self.ignored_databases.iter().cloned().collect(),
            )),
            (false, false) => Err(ConfigError::ConflictingDatabaseFilters),
        }
    }

    pub fn compatibility(&self) -> Compatibility {
        if self.pgbouncer {
            Compatibility::PoolingProxy
        } else {
            Compatibility::Direct
        }
    }

    /// Value for the `server` tag: the configured display name, or the
    /// address with credentials removed.
    pub fn server_tag(&self) -> String {
        match &self.output_address {
            Some(name) if !name.is_empty() => name.clone(),
            _ => sanitize_address(&self.address),
        }
    }
}

/// Removes passwords and key material from a connection address.
pub fn sanitize_address(address: &str) -> String {
    let trimmed = address.trim();
    for scheme in ["postgres://", "postgresql://"] {
        if let Some(rest) = trimmed.strip_prefix(scheme) {
            return sanitize_url(scheme, rest);
        }
    }

    trimmed
        .split_whitespace()
        .filter(|token| {
            let key = token.split('=').next().unwrap_or_default();
            !SECRET_KEYS.contains(&key)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize_url(scheme: &str, rest: &str) -> String {
    let (authority_and_path, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let authority_and_path = match authority_and_path.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            if user.is_empty() {
                host.to_string()
            } else {
                format!("{}@{}", user, host)
            }
        }
        None => authority_and_path.to_string(),
    };

    let query = query
        .map(|q| {
            q.split('&')
                .filter(|pair| {
                    let key = pair.split('=').next().unwrap_or_default();
                    !pair.is_empty() && !SECRET_KEYS.contains(&key)
                })
                .collect::<Vec<_>>()
                .join("&")
        })
        .filter(|q| !q.is_empty());

    match query {
        Some(q) => format!("{}{}?{}", scheme, authority_and_path, q),
        None => format!("{}{}", scheme, authority_and_path),
    }
}
