use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

use schemata_core::config::{DatabaseConfig, DbType};
use schemata_core::error::{Result, SchemataError};
use schemata_core::{ColumnInfo, IndexInfo, LedgerEntry, QueryResult, SchemaSnapshot, TableInfo};

use super::rows::{self, decode_column};
use super::{pool_timeout, quote_ident, Backend, BackendTransaction, BoxFuture, LEDGER_TABLE};

/// SQLite backend over an sqlx pool.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if missing) the configured database file.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = match &config.url {
            Some(url) => SqliteConnectOptions::from_str(url).map_err(|e| {
                SchemataError::Config(format!("Invalid sqlite url '{}': {}", url, e))
            })?,
            None => SqliteConnectOptions::new().filename(&config.path),
        }
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(pool_timeout(config))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn table_names(conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let names = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(conn)
        .await?;
        Ok(names)
    }

    async fn table_info(conn: &mut SqliteConnection, table: &str) -> Result<TableInfo> {
        let columns = sqlx::query(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<ColumnInfo> {
            Ok(ColumnInfo {
                name: row.try_get("name")?,
                data_type: row.try_get("type")?,
                nullable: row.try_get::<i64, _>("notnull")? == 0,
                default: row.try_get("dflt_value")?,
                primary_key: row.try_get::<i64, _>("pk")? > 0,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let index_rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT name, "unique" FROM pragma_index_list(?1) ORDER BY name"#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;

        let mut indexes = Vec::with_capacity(index_rows.len());
        for (name, unique) in index_rows {
            let index_columns: Vec<Option<String>> =
                sqlx::query_scalar("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                    .bind(&name)
                    .fetch_all(&mut *conn)
                    .await?;

            let definition: Option<Option<String>> =
                sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1")
                    .bind(&name)
                    .fetch_optional(&mut *conn)
                    .await?;

            indexes.push(IndexInfo {
                name,
                columns: index_columns.into_iter().flatten().collect(),
                unique: unique != 0,
                definition: definition.flatten(),
            });
        }

        let row_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table, '"')))
                .fetch_one(&mut *conn)
                .await?;

        Ok(TableInfo {
            name: table.to_string(),
            columns,
            indexes,
            row_count,
        })
    }
}

fn row_values(row: &SqliteRow) -> Vec<serde_json::Value> {
    (0..row.len())
        .map(|idx| {
            decode_column!(row, idx;
                i64 => serde_json::Value::from,
                f64 => serde_json::Value::from,
                String => serde_json::Value::from,
                Vec<u8> => rows::bytes_value,
            )
            .unwrap_or_else(|| rows::unsupported(row, idx))
        })
        .collect()
}

impl Backend for SqliteBackend {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn BackendTransaction>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await?;
            Ok(Box::new(SqliteTransaction { tx }) as Box<dyn BackendTransaction>)
        })
    }

    fn ensure_ledger_table(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    version TEXT PRIMARY KEY NOT NULL,
                    name TEXT NOT NULL,
                    checksum TEXT NOT NULL,
                    applied_at TEXT NOT NULL,
                    execution_time_ms INTEGER NOT NULL
                )
                "#,
                LEDGER_TABLE
            ))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn load_ledger(&self) -> BoxFuture<'_, Result<Vec<LedgerEntry>>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT version, name, checksum, applied_at, execution_time_ms FROM {}",
                LEDGER_TABLE
            ))
            .fetch_all(&self.pool)
            .await?;

            rows.iter()
                .map(|row| -> Result<LedgerEntry> {
                    Ok(LedgerEntry {
                        version: row.try_get("version")?,
                        name: row.try_get("name")?,
                        checksum: row.try_get("checksum")?,
                        applied_at: row.try_get::<DateTime<Utc>, _>("applied_at")?,
                        execution_time_ms: row.try_get("execution_time_ms")?,
                    })
                })
                .collect()
        })
    }

    fn introspect(&self) -> BoxFuture<'_, Result<SchemaSnapshot>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            let mut tables = Vec::new();
            for name in Self::table_names(&mut conn).await? {
                tables.push(Self::table_info(&mut conn, &name).await?);
            }
            Ok(SchemaSnapshot { tables })
        })
    }

    fn inspect_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<TableInfo>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            let exists: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_one(&mut *conn)
            .await?;

            if exists == 0 {
                return Err(SchemataError::TableNotFound(table.to_string()));
            }
            Self::table_info(&mut conn, table).await
        })
    }

    fn run_read_only<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<QueryResult>> {
        Box::pin(async move {
            let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
            Ok(QueryResult {
                columns: rows.first().map(rows::column_names).unwrap_or_default(),
                row_count: rows.len(),
                rows: rows.iter().map(row_values).collect(),
            })
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.pool.close().await })
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl BackendTransaction for SqliteTransaction {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let conn: &mut SqliteConnection = &mut self.tx;
            let result = sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
            Ok(result.rows_affected())
        })
    }

    fn insert_ledger_entry<'a>(&'a mut self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO {} (version, name, checksum, applied_at, execution_time_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
                LEDGER_TABLE
            ))
            .bind(&entry.version)
            .bind(&entry.name)
            .bind(&entry.checksum)
            .bind(entry.applied_at)
            .bind(entry.execution_time_ms)
            .execute(&mut *self.tx)
            .await?;
            Ok(())
        })
    }

    fn delete_ledger_entry<'a>(&'a mut self, version: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE version = ?1", LEDGER_TABLE))
                .bind(version)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.tx.commit().await?;
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.tx.rollback().await?;
            Ok(())
        })
    }
}
