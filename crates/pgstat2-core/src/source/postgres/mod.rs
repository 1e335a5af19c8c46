//! PostgreSQL-backed stat source.
//!
//! Cluster categories are read over a single "main" connection.
//!
//! ## Per-database collection
//!
//! Per-database categories need a connection to each database. The source
//! keeps a pool of `DatabaseClient` connections, one per connectable
//! non-template database that passes the configured database filter. The
//! connection strings are derived from the scope passed to `fetch_local` by
//! swapping its `dbname`. The pool is refreshed every 10 minutes to pick up
//! new databases and drop removed ones.
//!
//! With a non-zero `max_lifetime`, any connection older than the lifetime is
//! closed and reopened before its next query.

mod decode;

#[cfg(test)]
pub(in crate::source) use decode::columns;

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use self::decode::decode_rows;
use super::queries::{LIST_DATABASES, build_query};
use super::{SourceError, StatSource};
use crate::category::{Scope, StatCategory};
use crate::config::{CollectorConfig, ConfigError, DatabaseFilter};
use crate::rows::StatRows;

/// Interval between database pool refresh checks.
const DB_POOL_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A connection to a specific database for per-database collection.
struct DatabaseClient {
    datname: String,
    client: Client,
    connected_at: Instant,
}

/// Stat source reading PostgreSQL statistics views.
pub struct PostgresSource {
    connection_string: String,
    filter: DatabaseFilter,
    /// Zero keeps connections forever.
    max_lifetime: Duration,
    /// Main connection for cluster categories.
    client: Option<Client>,
    connected_at: Option<Instant>,
    server_version_num: Option<i32>,
    last_error: Option<String>,
    /// Per-database connections for local categories.
    db_clients: Vec<DatabaseClient>,
    /// Scope the pool was built for.
    db_clients_scope: Option<String>,
    db_clients_last_check: Option<Instant>,
}

impl PostgresSource {
    /// Creates a source from a validated configuration. Does not connect.
    pub fn from_config(config: &CollectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_connection_string(config.address.clone())
            .with_filter(config.database_filter()?)
            .with_max_lifetime(config.max_lifetime))
    }

    /// Creates a source for every database reachable through `connection_string`.
    pub fn with_connection_string(connection_string: String) -> Self {
        Self {
            connection_string,
            filter: DatabaseFilter::All,
            max_lifetime: Duration::ZERO,
            client: None,
            connected_at: None,
            server_version_num: None,
            last_error: None,
            db_clients: Vec::new(),
            db_clients_scope: None,
            db_clients_last_check: None,
        }
    }

    pub fn with_filter(mut self, filter: DatabaseFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    /// Attempts to connect to PostgreSQL.
    ///
    /// Useful for startup checks before the first cycle.
    pub fn try_connect(&mut self) -> Result<(), SourceError> {
        self.ensure_connected()
    }

    /// Returns the last error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Server version as reported by `server_version_num`, once connected.
    pub fn server_version_num(&self) -> Option<i32> {
        self.server_version_num
    }

    /// Names of the databases with an open per-database connection.
    pub fn pooled_databases(&self) -> Vec<&str> {
        self.db_clients.iter().map(|c| c.datname.as_str()).collect()
    }

    fn expired(&self, connected_at: Instant) -> bool {
        !self.max_lifetime.is_zero() && connected_at.elapsed() >= self.max_lifetime
    }

    /// Ensures the main connection is established, reconnecting if needed.
    fn ensure_connected(&mut self) -> Result<(), SourceError> {
        if let Some(connected_at) = self.connected_at
            && self.client.is_some()
            && self.expired(connected_at)
        {
            debug!("main connection reached max lifetime, reconnecting");
            self.client = None;
        }

        if self.client.is_some() {
            return Ok(());
        }

        match Client::connect(&self.connection_string, NoTls) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());

                self.client = Some(client);
                self.connected_at = Some(Instant::now());
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let msg = format_postgres_error(&e);
                self.last_error = Some(msg.clone());
                self.server_version_num = None;
                self.connected_at = None;
                Err(SourceError::Connection(msg))
            }
        }
    }

    /// Drops the main connection after a failed query; the next fetch reconnects.
    fn drop_main_connection(&mut self, msg: String) {
        self.last_error = Some(msg);
        self.client = None;
        self.connected_at = None;
        self.server_version_num = None;
    }

    /// Ensures per-database connections exist for every target database
    /// reachable through `scope`.
    ///
    /// A database that cannot be listed or connected fails the call, so a
    /// local category never silently misses a database.
    fn ensure_db_clients(&mut self, scope: &str) -> Result<(), SourceError> {
        if self.db_clients_scope.as_deref() != Some(scope) {
            self.db_clients.clear();
            self.db_clients_scope = Some(scope.to_string());
            self.db_clients_last_check = None;
        }

        let max_lifetime = self.max_lifetime;
        let before = self.db_clients.len();
        self.db_clients.retain(|c| {
            max_lifetime.is_zero() || c.connected_at.elapsed() < max_lifetime
        });
        let expired = before - self.db_clients.len();
        if expired > 0 {
            debug!(expired, "per-database connections reached max lifetime");
        }

        if expired == 0
            && let Some(last_check) = self.db_clients_last_check
            && last_check.elapsed() < DB_POOL_REFRESH_INTERVAL
            && !self.db_clients.is_empty()
        {
            return Ok(());
        }

        let Some(ref mut main_client) = self.client else {
            return Err(SourceError::Connection("not connected".to_string()));
        };

        let databases = match main_client.query(LIST_DATABASES, &[]) {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row.try_get::<_, String>(0).ok())
                .filter(|db| self.filter.allows(db))
                .collect::<Vec<_>>(),
            Err(e) => {
                let msg = format!("list databases: {}", format_postgres_error(&e));
                self.drop_main_connection(msg.clone());
                return Err(SourceError::Query(msg));
            }
        };

        let target_set: HashSet<&str> = databases.iter().map(|s| s.as_str()).collect();

        // Remove connections to databases that no longer exist or were filtered out.
        let before = self.db_clients.len();
        self.db_clients
            .retain(|c| target_set.contains(c.datname.as_str()));
        let removed = before - self.db_clients.len();

        // Keep live connections, reopen the rest.
        self.db_clients
            .retain_mut(|c| c.client.simple_query("").is_ok());
        let missing: Vec<String> = databases
            .iter()
            .filter(|db| !self.db_clients.iter().any(|c| c.datname == **db))
            .cloned()
            .collect();

        let opened = connect_each(scope, &missing, |conn_str| {
            Client::connect(conn_str, NoTls).map_err(|e| format_postgres_error(&e))
        });
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(error = %e, "failed to connect for per-database metrics");
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let added = opened.len();
        let now = Instant::now();
        self.db_clients
            .extend(opened.into_iter().map(|(datname, client)| DatabaseClient {
                datname,
                client,
                connected_at: now,
            }));
        self.db_clients.sort_by(|a, b| a.datname.cmp(&b.datname));
        self.db_clients_last_check = Some(now);

        if added > 0 || removed > 0 {
            let names = self.pooled_databases();
            info!(
                databases = ?names, added, removed,
                "per-database connection pool updated"
            );
        }
        Ok(())
    }
}

/// Opens one connection per database, deriving each connection string from
/// `scope`. Stops at the first database that cannot be reached.
fn connect_each<C, E: fmt::Display>(
    scope: &str,
    databases: &[String],
    mut connect: impl FnMut(&str) -> Result<C, E>,
) -> Result<Vec<(String, C)>, SourceError> {
    databases
        .iter()
        .map(|db| match connect(&replace_dbname(scope, db)) {
            Ok(client) => Ok((db.clone(), client)),
            Err(e) => Err(SourceError::Connection(format!("{}: {}", db, e))),
        })
        .collect()
}

/// Appends one database's rows to the category result.
fn append_rows(collected: &mut StatRows, datname: &str, rows: StatRows) -> Result<(), SourceError> {
    let returned = rows.category();
    if collected.extend(rows) {
        Ok(())
    } else {
        Err(SourceError::Decode {
            column: "*".to_string(),
            message: format!(
                "{} returned {} rows, expected {}",
                datname,
                returned,
                collected.category()
            ),
        })
    }
}

impl StatSource for PostgresSource {
    fn fetch_cluster(&mut self, category: StatCategory) -> Result<StatRows, SourceError> {
        if category.scope() != Scope::Cluster {
            return Err(SourceError::Query(format!(
                "{} is not a cluster-level category",
                category
            )));
        }

        self.ensure_connected()?;
        let query = build_query(category, self.server_version_num);
        let Some(client) = self.client.as_mut() else {
            return Err(SourceError::Connection("not connected".to_string()));
        };

        let result = match client.query(query.as_str(), &[]) {
            Ok(rows) => rows,
            Err(e) => {
                let msg = format_postgres_error(&e);
                self.drop_main_connection(msg.clone());
                return Err(SourceError::Query(msg));
            }
        };

        let mut rows = decode_rows(category, &result)?;
        rows.retain_databases(|db| self.filter.allows(db));
        Ok(rows)
    }

    fn fetch_local(
        &mut self,
        category: StatCategory,
        scope: &str,
    ) -> Result<StatRows, SourceError> {
        if category.scope() != Scope::PerDatabase {
            return Err(SourceError::Query(format!(
                "{} is not a per-database category",
                category
            )));
        }

        self.ensure_connected()?;
        self.ensure_db_clients(scope)?;
        let query = build_query(category, self.server_version_num);

        let mut collected = StatRows::empty(category);
        let mut failed: Option<(String, String)> = None;
        for db in &mut self.db_clients {
            match db.client.query(query.as_str(), &[]) {
                Ok(result) => {
                    append_rows(&mut collected, &db.datname, decode_rows(category, &result)?)?;
                }
                Err(e) => {
                    failed = Some((db.datname.clone(), format_postgres_error(&e)));
                    break;
                }
            }
        }

        if let Some((datname, msg)) = failed {
            // Drop the broken connection; it is re-established on the next refresh.
            self.db_clients.retain(|c| c.datname != datname);
            self.db_clients_last_check = None;
            let msg = format!("{}: {}", datname, msg);
            self.last_error = Some(msg.clone());
            return Err(SourceError::Query(msg));
        }

        debug!(%category, databases = self.db_clients.len(), rows = collected.len(), "fetched");
        Ok(collected)
    }
}

/// Replaces the database name in a connection string.
///
/// Handles both libpq `key=value` strings, where `dbname=` is replaced or
/// appended, and `postgres://` URLs, where the path is replaced.
fn replace_dbname(connection_string: &str, new_db: &str) -> String {
    for scheme in ["postgres://", "postgresql://"] {
        if let Some(rest) = connection_string.strip_prefix(scheme) {
            let (base, query) = match rest.split_once('?') {
                Some((b, q)) => (b, Some(q)),
                None => (rest, None),
            };
            let authority = base.split_once('/').map(|(a, _)| a).unwrap_or(base);
            return match query {
                Some(q) => format!("{}{}/{}?{}", scheme, authority, new_db, q),
                None => format!("{}{}/{}", scheme, authority, new_db),
            };
        }
    }

    // libpq key=value format: tokens separated by spaces
    let mut found = false;
    let parts: Vec<String> = connection_string
        .split_whitespace()
        .map(|token| {
            if token.starts_with("dbname=") {
                found = true;
                format!("dbname={}", new_db)
            } else {
                token.to_string()
            }
        })
        .collect();

    if found {
        parts.join(" ")
    } else {
        format!("{} dbname={}", connection_string, new_db)
    }
}

/// Formats a PostgreSQL error for logs and error values.
///
/// Connect failures carry the interesting part (refused, timed out, bad
/// password) in their source chain, so the whole chain is inspected.
pub fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        return format!("{}: {}", db_error.severity(), db_error.message());
    }
    condense_error_chain(e)
}

fn condense_error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut cause = e.source();
    while let Some(c) = cause {
        let text = c.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        cause = c.source();
    }

    if msg.contains("Connection refused") {
        "connection refused".to_string()
    } else if msg.contains("password authentication failed") {
        "password authentication failed".to_string()
    } else if msg.contains("does not exist") {
        msg.split("FATAL:")
            .last()
            .unwrap_or(&msg)
            .trim()
            .to_string()
    } else {
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::sample_rows;

    #[test]
    fn replace_dbname_replaces_existing() {
        let conn = "host=localhost port=5432 user=app dbname=postgres";
        assert_eq!(
            replace_dbname(conn, "mydb"),
            "host=localhost port=5432 user=app dbname=mydb"
        );
    }

    #[test]
    fn replace_dbname_appends_when_missing() {
        let conn = "host=localhost user=postgres sslmode=disable";
        assert_eq!(
            replace_dbname(conn, "mydb"),
            "host=localhost user=postgres sslmode=disable dbname=mydb"
        );
    }

    #[test]
    fn replace_dbname_rewrites_url_path() {
        assert_eq!(
            replace_dbname("postgres://app@db:5432/postgres?sslmode=disable", "mydb"),
            "postgres://app@db:5432/mydb?sslmode=disable"
        );
        assert_eq!(
            replace_dbname("postgresql://db", "mydb"),
            "postgresql://db/mydb"
        );
    }

    #[test]
    fn from_config_rejects_conflicting_filters() {
        let config = CollectorConfig {
            databases: vec!["app".into()],
            ignored_databases: vec!["postgres".into()],
            ..Default::default()
        };
        assert!(matches!(
            PostgresSource::from_config(&config),
            Err(ConfigError::ConflictingDatabaseFilters)
        ));
    }

    #[test]
    fn new_source_is_disconnected() {
        let source = PostgresSource::from_config(&CollectorConfig::default()).unwrap();
        assert!(source.last_error().is_none());
        assert!(source.server_version_num().is_none());
        assert!(source.pooled_databases().is_empty());
    }

    #[test]
    fn wrong_scope_is_rejected_without_connecting() {
        let mut source = PostgresSource::with_connection_string("host=invalid".into());
        assert!(matches!(
            source.fetch_cluster(StatCategory::DiskIO),
            Err(SourceError::Query(_))
        ));
        assert!(matches!(
            source.fetch_local(StatCategory::Locks, "host=invalid"),
            Err(SourceError::Query(_))
        ));
        assert!(source.last_error().is_none());
    }

    #[test]
    fn lifetime_zero_never_expires() {
        let opened = Instant::now();
        std::thread::sleep(Duration::from_millis(5));

        let source = PostgresSource::with_connection_string(String::new());
        assert!(!source.expired(opened));
        let source = source.with_max_lifetime(Duration::from_millis(1));
        assert!(source.expired(opened));
        assert!(!source.expired(Instant::now() + Duration::from_secs(1)));
    }

    #[test]
    fn refused_connection_is_condensed() {
        let err = match Client::connect("host=127.0.0.1 port=1 user=postgres connect_timeout=2", NoTls) {
            Ok(_) => panic!("nothing should listen on port 1"),
            Err(e) => e,
        };
        assert_eq!(format_postgres_error(&err), "connection refused");

        let mut source =
            PostgresSource::with_connection_string("host=127.0.0.1 port=1 user=postgres".into());
        assert_eq!(
            source.try_connect(),
            Err(SourceError::Connection("connection refused".to_string()))
        );
        assert_eq!(source.last_error(), Some("connection refused"));
    }

    #[test]
    fn unreachable_database_fails_the_pool() {
        let databases = vec!["app".to_string(), "secret".to_string(), "zoo".to_string()];
        let mut attempted = Vec::new();
        let result = connect_each("host=db user=mon", &databases, |conn_str| {
            attempted.push(conn_str.to_string());
            if conn_str.ends_with("dbname=secret") {
                Err("FATAL: permission denied for database \"secret\"")
            } else {
                Ok(())
            }
        });

        assert_eq!(
            result,
            Err(SourceError::Connection(
                "secret: FATAL: permission denied for database \"secret\"".to_string()
            ))
        );
        assert_eq!(
            attempted,
            vec!["host=db user=mon dbname=app", "host=db user=mon dbname=secret"]
        );
    }

    #[test]
    fn pool_opens_every_database_in_order() {
        let databases = vec!["app".to_string(), "postgres".to_string()];
        let opened = connect_each("postgres://mon@db/postgres", &databases, |conn_str| {
            Ok::<_, String>(conn_str.to_string())
        })
        .unwrap();

        assert_eq!(
            opened,
            vec![
                ("app".to_string(), "postgres://mon@db/app".to_string()),
                ("postgres".to_string(), "postgres://mon@db/postgres".to_string()),
            ]
        );
    }

    #[test]
    fn rows_of_another_category_are_rejected() {
        let mut collected = StatRows::empty(StatCategory::DiskIO);
        assert!(append_rows(&mut collected, "app", sample_rows(StatCategory::DiskIO)).is_ok());

        let err = append_rows(&mut collected, "app", sample_rows(StatCategory::IndexIO)).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
        assert_eq!(collected.len(), 1);
    }

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Layer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.1.as_deref().map(|l| l as &(dyn std::error::Error + 'static))
        }
    }

    #[test]
    fn error_causes_are_classified() {
        let refused = Layer(
            "error connecting to server",
            Some(Box::new(Layer("Connection refused (os error 111)", None))),
        );
        assert_eq!(condense_error_chain(&refused), "connection refused");

        let timeout = Layer(
            "error connecting to server",
            Some(Box::new(Layer("timed out", None))),
        );
        assert_eq!(
            condense_error_chain(&timeout),
            "error connecting to server: timed out"
        );
    }
}
