//! Backend adapters.
//!
//! One [`Backend`] implementation per database family. Everything
//! dialect-specific (ledger DDL, placeholders, catalog queries, identifier
//! quoting) lives behind this trait so the migration engine never needs to
//! know which database it is talking to.

mod mysql;
mod postgres;
mod rows;
mod sqlite;

pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use schemata_core::config::{DatabaseConfig, DbType};
use schemata_core::error::{Result, SchemataError};
use schemata_core::{LedgerEntry, QueryResult, SchemaSnapshot, TableInfo};

/// Name of the bookkeeping table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Boxed future returned by backend operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability interface implemented once per database family.
pub trait Backend: Send + Sync {
    /// Database family this backend talks to.
    fn db_type(&self) -> DbType;

    /// Round-trip a trivial query.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;

    /// Open a transaction scope. Dropping it without commit rolls back.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn BackendTransaction>>>;

    /// Idempotently create the ledger table.
    fn ensure_ledger_table(&self) -> BoxFuture<'_, Result<()>>;

    /// Every ledger row, in no particular order.
    fn load_ledger(&self) -> BoxFuture<'_, Result<Vec<LedgerEntry>>>;

    /// Tables, columns, indexes and row counts.
    fn introspect(&self) -> BoxFuture<'_, Result<SchemaSnapshot>>;

    /// A single table. Fails with `TableNotFound` when absent.
    fn inspect_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<TableInfo>>;

    /// Run a query on a pooled connection without an explicit transaction.
    ///
    /// No filtering happens here; callers gate the SQL first.
    fn run_read_only<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<QueryResult>>;

    /// Close every pooled connection.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Run `statements` in one transaction and return the elapsed time in ms.
    ///
    /// The first failing statement rolls the whole transaction back.
    fn execute_in_transaction<'a>(
        &'a self,
        label: &'a str,
        statements: &'a [String],
    ) -> BoxFuture<'a, Result<i64>> {
        Box::pin(async move {
            let start = Instant::now();
            let mut tx = self.begin().await?;

            if let Err(e) = run_statements(tx.as_mut(), label, statements).await {
                abort(tx).await;
                return Err(e);
            }

            tx.commit().await?;
            Ok(elapsed_ms(start))
        })
    }
}

/// An open transaction on a backend connection.
pub trait BackendTransaction: Send {
    /// Execute one statement, returning the affected row count.
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Insert a ledger row.
    fn insert_ledger_entry<'a>(&'a mut self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>>;

    /// Delete a ledger row. Returns whether a row was removed.
    fn delete_ledger_entry<'a>(&'a mut self, version: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Connect to the database described by `config`.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Backend>> {
    config.validate()?;
    info!(target_db = %config.describe(), "Connecting to {}", config.db_type);

    let backend: Arc<dyn Backend> = match config.db_type {
        DbType::Sqlite => Arc::new(SqliteBackend::connect(config).await?),
        DbType::Postgres => Arc::new(PostgresBackend::connect(config).await?),
        DbType::Mysql => Arc::new(MySqlBackend::connect(config).await?),
    };

    Ok(backend)
}

/// Execute `statements` in order inside `tx`.
///
/// A failure is reported as [`SchemataError::Execution`] carrying the index of
/// the failing statement and the database's message verbatim.
pub async fn run_statements(
    tx: &mut dyn BackendTransaction,
    label: &str,
    statements: &[String],
) -> Result<()> {
    for (statement_index, statement) in statements.iter().enumerate() {
        tx.execute(statement)
            .await
            .map_err(|e| SchemataError::Execution {
                version: label.to_string(),
                statement_index,
                message: e.backend_message(),
            })?;
    }
    Ok(())
}

/// Roll back after a failure. A failing rollback is logged, not returned,
/// so the caller can surface the original error.
pub async fn abort(tx: Box<dyn BackendTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!("Failed to roll back transaction: {}", e);
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn pool_timeout(config: &DatabaseConfig) -> Duration {
    Duration::from_secs(config.pool_timeout_secs)
}

/// Quote an identifier with `quote`, doubling any embedded quote characters.
pub(crate) fn quote_ident(name: &str, quote: char) -> String {
    let escaped = name.replace(quote, &format!("{}{}", quote, quote));
    format!("{}{}{}", quote, escaped, quote)
}
