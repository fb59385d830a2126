use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, Row, Transaction};

use schemata_core::config::{DatabaseConfig, DbType};
use schemata_core::error::{Result, SchemataError};
use schemata_core::{ColumnInfo, IndexInfo, LedgerEntry, QueryResult, SchemaSnapshot, TableInfo};

use super::rows::{self, decode_column};
use super::{pool_timeout, quote_ident, Backend, BackendTransaction, BoxFuture, LEDGER_TABLE};

/// PostgreSQL backend. Introspection is limited to `current_schema()`.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(pool_timeout(config))
            .connect_with(connect_options(config)?)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool> {
        let exists = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
                  AND table_type = 'BASE TABLE'
            )
            "#,
        )
        .bind(table)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    async fn table_info(conn: &mut PgConnection, table: &str) -> Result<TableInfo> {
        let qualified = quote_ident(table, '"');

        let primary_keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = to_regclass($1) AND i.indisprimary
            "#,
        )
        .bind(&qualified)
        .fetch_all(&mut *conn)
        .await?;

        let columns = sqlx::query(
            r#"
            SELECT column_name::text AS name,
                   data_type::text AS data_type,
                   is_nullable = 'YES' AS nullable,
                   column_default::text AS column_default
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<ColumnInfo> {
            let name: String = row.try_get("name")?;
            Ok(ColumnInfo {
                primary_key: primary_keys.contains(&name),
                name,
                data_type: row.try_get("data_type")?,
                nullable: row.try_get("nullable")?,
                default: row.try_get("column_default")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let indexes = sqlx::query(
            r#"
            SELECT ic.relname::text AS name,
                   ix.indisunique AS is_unique,
                   pg_get_indexdef(ix.indexrelid) AS definition,
                   ARRAY(
                       SELECT a.attname::text
                       FROM unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
                       JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                       ORDER BY k.ord
                   ) AS columns
            FROM pg_index ix
            JOIN pg_class ic ON ic.oid = ix.indexrelid
            WHERE ix.indrelid = to_regclass($1)
            ORDER BY ic.relname
            "#,
        )
        .bind(&qualified)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<IndexInfo> {
            Ok(IndexInfo {
                name: row.try_get("name")?,
                columns: row.try_get("columns")?,
                unique: row.try_get("is_unique")?,
                definition: row.try_get("definition")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", qualified))
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

/// Build connect options from the url or the discrete fields.
fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    if let Some(url) = &config.url {
        return PgConnectOptions::from_str(url)
            .map_err(|e| SchemataError::Config(format!("Invalid postgres url: {}", e)));
    }

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.effective_port().unwrap_or(5432))
        .database(config.database.as_deref().unwrap_or_default())
        .username(config.user.as_deref().unwrap_or_default());
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    Ok(options)
}

fn row_values(row: &PgRow) -> Vec<serde_json::Value> {
    (0..row.len())
        .map(|idx| {
            decode_column!(row, idx;
                bool => serde_json::Value::from,
                i16 => serde_json::Value::from,
                i32 => serde_json::Value::from,
                i64 => serde_json::Value::from,
                f32 => serde_json::Value::from,
                f64 => serde_json::Value::from,
                String => serde_json::Value::from,
                serde_json::Value => std::convert::identity,
                uuid::Uuid => |v: uuid::Uuid| serde_json::Value::from(v.to_string()),
                NaiveDate => |v: NaiveDate| serde_json::Value::from(v.to_string()),
                NaiveTime => |v: NaiveTime| serde_json::Value::from(v.to_string()),
                NaiveDateTime => |v: NaiveDateTime| serde_json::Value::from(v.to_string()),
                DateTime<Utc> => |v: DateTime<Utc>| serde_json::Value::from(v.to_rfc3339()),
                Vec<u8> => rows::bytes_value,
            )
            .unwrap_or_else(|| rows::unsupported(row, idx))
        })
        .collect()
}

impl Backend for PostgresBackend {
    fn db_type(&self) -> DbType {
        DbType::Postgres
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
            Ok(Box::new(PostgresTransaction { tx }) as Box<dyn BackendTransaction>)
        })
    }

    fn ensure_ledger_table(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    version VARCHAR(255) PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    checksum VARCHAR(64) NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    execution_time_ms BIGINT NOT NULL
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
            let rows: Vec<(String, String, String, DateTime<Utc>, i64)> = sqlx::query_as(&format!(
                "SELECT version, name, checksum, applied_at, execution_time_ms FROM {}",
                LEDGER_TABLE
            ))
            .fetch_all(&self.pool)
            .await?;

            Ok(rows
                .into_iter()
                .map(
                    |(version, name, checksum, applied_at, execution_time_ms)| LedgerEntry {
                        version,
                        name,
                        checksum,
                        applied_at,
                        execution_time_ms,
                    },
                )
                .collect())
        })
    }

    fn introspect(&self) -> BoxFuture<'_, Result<SchemaSnapshot>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            let names: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT table_name::text
                FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
            )
            .fetch_all(&mut *conn)
            .await?;

            let mut tables = Vec::with_capacity(names.len());
            for name in &names {
                tables.push(Self::table_info(&mut conn, name).await?);
            }
            Ok(SchemaSnapshot { tables })
        })
    }

    fn inspect_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<TableInfo>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            if !Self::table_exists(&mut conn, table).await? {
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

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl BackendTransaction for PostgresTransaction {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let conn: &mut PgConnection = &mut self.tx;
            let result = sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
            Ok(result.rows_affected())
        })
    }

    fn insert_ledger_entry<'a>(&'a mut self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO {} (version, name, checksum, applied_at, execution_time_ms) VALUES ($1, $2, $3, $4, $5)",
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
            let result = sqlx::query(&format!("DELETE FROM {} WHERE version = $1", LEDGER_TABLE))
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
