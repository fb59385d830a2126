use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, MySqlConnection, Row, Transaction};

use schemata_core::config::{DatabaseConfig, DbType};
use schemata_core::error::{Result, SchemataError};
use schemata_core::{ColumnInfo, IndexInfo, LedgerEntry, QueryResult, SchemaSnapshot, TableInfo};

use super::rows::{self, decode_column};
use super::{pool_timeout, quote_ident, Backend, BackendTransaction, BoxFuture, LEDGER_TABLE};

/// MySQL backend scoped to the connection's default database.
///
/// MySQL commits DDL implicitly, so a failed migration can leave earlier
/// DDL statements of the same script in place even though the ledger row
/// is never written.
#[derive(Clone)]
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(pool_timeout(config))
            .connect_with(connect_options(config)?)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn table_info(conn: &mut MySqlConnection, table: &str) -> Result<TableInfo> {
        let columns = sqlx::query(
            r#"
            SELECT CAST(column_name AS CHAR) AS name,
                   CAST(column_type AS CHAR) AS data_type,
                   CAST(is_nullable AS CHAR) AS is_nullable,
                   CAST(column_default AS CHAR) AS column_default,
                   CAST(column_key AS CHAR) AS column_key
            FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ?
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<ColumnInfo> {
            Ok(ColumnInfo {
                name: row.try_get("name")?,
                data_type: row.try_get("data_type")?,
                nullable: row.try_get::<String, _>("is_nullable")? == "YES",
                default: row.try_get("column_default")?,
                primary_key: row.try_get::<String, _>("column_key")? == "PRI",
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let indexes = sqlx::query(
            r#"
            SELECT CAST(index_name AS CHAR) AS name,
                   CAST(MIN(non_unique) AS SIGNED) AS non_unique,
                   CAST(GROUP_CONCAT(column_name ORDER BY seq_in_index SEPARATOR ',') AS CHAR) AS columns
            FROM information_schema.statistics
            WHERE table_schema = DATABASE() AND table_name = ?
            GROUP BY index_name
            ORDER BY index_name
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<IndexInfo> {
            let columns: Option<String> = row.try_get("columns")?;
            Ok(IndexInfo {
                name: row.try_get("name")?,
                columns: columns
                    .map(|c| c.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
                unique: row.try_get::<i64, _>("non_unique")? == 0,
                definition: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let row_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table, '`')))
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

fn connect_options(config: &DatabaseConfig) -> Result<MySqlConnectOptions> {
    if let Some(url) = &config.url {
        return MySqlConnectOptions::from_str(url)
            .map_err(|e| SchemataError::Config(format!("Invalid mysql url: {}", e)));
    }

    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.effective_port().unwrap_or(3306))
        .database(config.database.as_deref().unwrap_or_default())
        .username(config.user.as_deref().unwrap_or_default());
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    Ok(options)
}

fn row_values(row: &MySqlRow) -> Vec<serde_json::Value> {
    (0..row.len())
        .map(|idx| {
            decode_column!(row, idx;
                i64 => serde_json::Value::from,
                u64 => serde_json::Value::from,
                f32 => serde_json::Value::from,
                f64 => serde_json::Value::from,
                String => serde_json::Value::from,
                NaiveDate => |v: NaiveDate| serde_json::Value::from(v.to_string()),
                NaiveTime => |v: NaiveTime| serde_json::Value::from(v.to_string()),
                NaiveDateTime => |v: NaiveDateTime| serde_json::Value::from(v.to_string()),
                DateTime<Utc> => |v: DateTime<Utc>| serde_json::Value::from(v.to_rfc3339()),
                serde_json::Value => std::convert::identity,
                Vec<u8> => rows::bytes_value,
            )
            .unwrap_or_else(|| rows::unsupported(row, idx))
        })
        .collect()
}

impl Backend for MySqlBackend {
    fn db_type(&self) -> DbType {
        DbType::Mysql
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
            Ok(Box::new(MySqlTransaction { tx }) as Box<dyn BackendTransaction>)
        })
    }

    fn ensure_ledger_table(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    version VARCHAR(255) NOT NULL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    checksum VARCHAR(64) NOT NULL,
                    applied_at DATETIME(6) NOT NULL,
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
            let rows: Vec<(String, String, String, NaiveDateTime, i64)> =
                sqlx::query_as(&format!(
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
                        applied_at: applied_at.and_utc(),
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
                SELECT CAST(table_name AS CHAR)
                FROM information_schema.tables
                WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
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
            let exists: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM information_schema.tables
                WHERE table_schema = DATABASE() AND table_name = ? AND table_type = 'BASE TABLE'
                "#,
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

struct MySqlTransaction {
    tx: Transaction<'static, MySql>,
}

impl BackendTransaction for MySqlTransaction {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let conn: &mut MySqlConnection = &mut self.tx;
            let result = sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
            Ok(result.rows_affected())
        })
    }

    fn insert_ledger_entry<'a>(&'a mut self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO {} (version, name, checksum, applied_at, execution_time_ms) VALUES (?, ?, ?, ?, ?)",
                LEDGER_TABLE
            ))
            .bind(&entry.version)
            .bind(&entry.name)
            .bind(&entry.checksum)
            .bind(entry.applied_at.naive_utc())
            .bind(entry.execution_time_ms)
            .execute(&mut *self.tx)
            .await?;
            Ok(())
        })
    }

    fn delete_ledger_entry<'a>(&'a mut self, version: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE version = ?", LEDGER_TABLE))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_rejects_bad_url() {
        let config = DatabaseConfig {
            db_type: DbType::Mysql,
            url: Some("mysql://root@localhost:notaport/shop".into()),
            ..Default::default()
        };

        assert!(matches!(
            connect_options(&config),
            Err(SchemataError::Config(_))
        ));
    }

    #[test]
    fn test_connect_options_from_fields() {
        let config = DatabaseConfig {
            db_type: DbType::Mysql,
            database: Some("shop".into()),
            user: Some("root".into()),
            ..Default::default()
        };

        assert!(connect_options(&config).is_ok());
    }
}
