use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use schemata_core::config::SchemataConfig;
use schemata_core::error::{Result, SchemataError};
use schemata_core::{
    compare_versions, Direction, LedgerEntry, MigrationFile, MigrationState, SchemaSnapshot,
};

use super::ledger::Ledger;
use super::outcome::{
    ApplyOutcome, BatchReport, ConnectionStatus, CreatedMigration, DriftKind, DriftReport,
    FailedMigration, MigrationPlan, MigrationStatus, QueryOutcome, RollbackOutcome,
};
use super::split::split_statements_for;
use super::store::MigrationStore;
use crate::db::{self, abort, elapsed_ms, run_statements, Backend};
use crate::guard::{QueryGuard, Verdict};

/// Reconciles migration files with the ledger and applies changes.
///
/// Nothing is cached between calls except the fact that the ledger table
/// exists: files and ledger rows are re-read on every operation.
pub struct MigrationEngine {
    backend: Arc<dyn Backend>,
    store: MigrationStore,
    ledger: Ledger,
    guard: QueryGuard,
    ledger_ready: OnceCell<()>,
}

impl MigrationEngine {
    pub fn new(backend: Arc<dyn Backend>, store: MigrationStore) -> Self {
        Self {
            ledger: Ledger::new(backend.clone()),
            guard: QueryGuard::default().for_dialect(backend.db_type()),
            backend,
            store,
            ledger_ready: OnceCell::new(),
        }
    }

    /// Connect to the configured database and open its migrations directory.
    pub async fn from_config(config: &SchemataConfig) -> Result<Self> {
        let backend = db::connect(&config.database).await?;
        Ok(Self::new(
            backend,
            MigrationStore::from_config(&config.migrations),
        ))
    }

    pub fn with_guard(mut self, guard: QueryGuard) -> Self {
        self.guard = guard.for_dialect(self.backend.db_type());
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    async fn ensure_ledger(&self) -> Result<()> {
        self.ledger_ready
            .get_or_try_init(|| self.ledger.ensure())
            .await?;
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<LedgerEntry>> {
        self.ensure_ledger().await?;
        self.ledger.load().await
    }

    /// Every version found in the directory or the ledger, ascending.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        let files = self.store.list_all()?;
        let mut ledger: HashMap<String, LedgerEntry> = self
            .applied()
            .await?
            .into_iter()
            .map(|e| (e.version.clone(), e))
            .collect();

        let mut statuses: Vec<MigrationStatus> = files
            .into_iter()
            .map(|file| match ledger.remove(&file.version) {
                Some(entry) => {
                    let drifted = entry.checksum != file.checksum;
                    MigrationStatus {
                        version: file.version,
                        name: file.name,
                        state: if drifted {
                            MigrationState::AppliedWithDrift
                        } else {
                            MigrationState::Applied
                        },
                        applied_at: Some(entry.applied_at),
                        execution_time_ms: Some(entry.execution_time_ms),
                        checksum: Some(file.checksum),
                        stored_checksum: Some(entry.checksum),
                        drifted,
                    }
                }
                None => MigrationStatus {
                    version: file.version,
                    name: file.name,
                    state: MigrationState::Pending,
                    applied_at: None,
                    execution_time_ms: None,
                    checksum: Some(file.checksum),
                    stored_checksum: None,
                    drifted: false,
                },
            })
            .collect();

        statuses.extend(ledger.into_values().map(|entry| MigrationStatus {
            version: entry.version,
            name: entry.name,
            state: MigrationState::MissingFile,
            applied_at: Some(entry.applied_at),
            execution_time_ms: Some(entry.execution_time_ms),
            checksum: None,
            stored_checksum: Some(entry.checksum),
            drifted: true,
        }));

        statuses.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(statuses)
    }

    /// Files without a ledger entry, ascending.
    pub async fn pending(&self) -> Result<Vec<MigrationFile>> {
        let files = self.store.list_all()?;
        let applied = self.applied().await?;

        Ok(files
            .into_iter()
            .filter(|f| !applied.iter().any(|e| e.version == f.version))
            .collect())
    }

    /// Greatest applied version.
    pub async fn current_version(&self) -> Result<Option<String>> {
        Ok(self.applied().await?.pop().map(|e| e.version))
    }

    /// Apply a single migration, or plan it when `dry_run` is set.
    pub async fn apply(&self, version: &str, dry_run: bool) -> Result<ApplyOutcome> {
        let migration = self.store.read(version)?;
        if self
            .applied()
            .await?
            .iter()
            .any(|e| e.version == migration.version)
        {
            return Err(SchemataError::AlreadyApplied(migration.version));
        }

        self.apply_file(&migration, dry_run).await
    }

    async fn apply_file(&self, migration: &MigrationFile, dry_run: bool) -> Result<ApplyOutcome> {
        let statements = split_statements_for(&migration.up_sql, self.backend.db_type());

        if dry_run {
            debug!(version = %migration.version, statements = statements.len(), "Planned migration");
            return Ok(ApplyOutcome::Planned(MigrationPlan {
                version: migration.version.clone(),
                name: migration.name.clone(),
                direction: Direction::Up,
                statements,
            }));
        }

        let start = Instant::now();
        let mut tx = self.backend.begin().await?;

        if let Err(e) = run_statements(tx.as_mut(), &migration.version, &statements).await {
            abort(tx).await;
            error!(version = %migration.version, "Migration {} failed: {}", migration.full_name(), e);
            return Err(e);
        }

        let entry = LedgerEntry {
            version: migration.version.clone(),
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at: Utc::now(),
            execution_time_ms: elapsed_ms(start),
        };

        if let Err(e) = Ledger::record_in(tx.as_mut(), &entry).await {
            abort(tx).await;
            error!(version = %migration.version, "Failed to record migration {}: {}", migration.full_name(), e);
            return Err(e);
        }

        tx.commit().await?;

        info!(
            version = %entry.version,
            execution_time_ms = entry.execution_time_ms,
            "Applied migration {}",
            migration.full_name()
        );
        Ok(ApplyOutcome::Applied(entry))
    }

    /// Apply every pending migration in order, stopping at the first failure.
    pub async fn apply_all_pending(&self, dry_run: bool) -> Result<BatchReport> {
        let pending = self.pending().await?;
        let mut report = BatchReport {
            dry_run,
            total: pending.len(),
            succeeded: Vec::new(),
            failed: None,
            unattempted: Vec::new(),
        };

        let mut remaining = pending.into_iter();
        for migration in remaining.by_ref() {
            match self.apply_file(&migration, dry_run).await {
                Ok(outcome) => report.succeeded.push(outcome),
                Err(e) => {
                    report.failed = Some(FailedMigration {
                        version: migration.version,
                        name: migration.name,
                        statement_index: match &e {
                            SchemataError::Execution {
                                statement_index, ..
                            } => Some(*statement_index),
                            _ => None,
                        },
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }
        report.unattempted = remaining.map(|m| m.version).collect();

        if let Some(failed) = &report.failed {
            warn!(
                version = %failed.version,
                unattempted = report.unattempted.len(),
                "Stopped after {} of {} migrations",
                report.succeeded.len(),
                report.total
            );
        }

        Ok(report)
    }

    /// Roll back an applied migration using its down script.
    pub async fn rollback(&self, version: &str, dry_run: bool) -> Result<RollbackOutcome> {
        let entry = self
            .applied()
            .await?
            .into_iter()
            .find(|e| e.version == version || format!("{}_{}", e.version, e.name) == version)
            .ok_or_else(|| SchemataError::NotApplied(version.to_string()))?;

        self.rollback_entry(entry, dry_run).await
    }

    /// Roll back the applied migration with the greatest version.
    pub async fn rollback_last(&self, dry_run: bool) -> Result<RollbackOutcome> {
        let entry = self
            .applied()
            .await?
            .pop()
            .ok_or(SchemataError::NothingApplied)?;

        self.rollback_entry(entry, dry_run).await
    }

    async fn rollback_entry(&self, entry: LedgerEntry, dry_run: bool) -> Result<RollbackOutcome> {
        let down_sql = match self.store.read(&entry.version) {
            Ok(file) => file.down_sql,
            Err(SchemataError::VersionNotFound(_)) | Err(SchemataError::DirectoryNotFound(_)) => None,
            Err(e) => return Err(e),
        }
        .ok_or_else(|| SchemataError::NoDownScript(entry.version.clone()))?;

        let statements = split_statements_for(&down_sql, self.backend.db_type());

        if dry_run {
            return Ok(RollbackOutcome::Planned(MigrationPlan {
                version: entry.version,
                name: entry.name,
                direction: Direction::Down,
                statements,
            }));
        }

        let start = Instant::now();
        let mut tx = self.backend.begin().await?;

        if let Err(e) = run_statements(tx.as_mut(), &entry.version, &statements).await {
            abort(tx).await;
            error!(version = %entry.version, "Rollback of {} failed: {}", entry.version, e);
            return Err(e);
        }
        if let Err(e) = Ledger::remove_in(tx.as_mut(), &entry.version).await {
            abort(tx).await;
            return Err(e);
        }
        tx.commit().await?;

        let execution_time_ms = elapsed_ms(start);
        info!(version = %entry.version, execution_time_ms, "Rolled back migration {}_{}", entry.version, entry.name);

        Ok(RollbackOutcome::RolledBack {
            version: entry.version,
            name: entry.name,
            execution_time_ms,
        })
    }

    /// Compare every ledger checksum with the file on disk.
    pub async fn check_drift(&self) -> Result<Vec<DriftReport>> {
        let files: HashMap<String, MigrationFile> = match self.store.list_all() {
            Ok(files) => files.into_iter().map(|f| (f.version.clone(), f)).collect(),
            Err(SchemataError::DirectoryNotFound(_)) => HashMap::new(),
            Err(e) => return Err(e),
        };

        let reports: Vec<DriftReport> = self
            .applied()
            .await?
            .into_iter()
            .map(|entry| {
                let current = files.get(&entry.version).map(|f| f.checksum.clone());
                let kind = match &current {
                    None => DriftKind::MissingFile,
                    Some(checksum) if *checksum != entry.checksum => DriftKind::Modified,
                    Some(_) => DriftKind::Clean,
                };
                DriftReport {
                    version: entry.version,
                    name: entry.name,
                    stored_checksum: entry.checksum,
                    current_checksum: current,
                    kind,
                }
            })
            .collect();

        for report in reports.iter().filter(|r| r.drifted()) {
            warn!(
                version = %report.version,
                kind = ?report.kind,
                "Migration {}_{} has drifted since it was applied",
                report.version,
                report.name
            );
        }

        Ok(reports)
    }

    /// Write a new migration pair with the next version number.
    pub async fn create_migration(
        &self,
        name: &str,
        up_sql: &str,
        down_sql: Option<&str>,
    ) -> Result<CreatedMigration> {
        let existing: Vec<String> = match self.store.list_all() {
            Ok(files) => files.into_iter().map(|f| f.version).collect(),
            Err(SchemataError::DirectoryNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let version = self.store.next_version(&existing, Utc::now());
        let written = self
            .store
            .write(&version, name, up_sql, down_sql, Utc::now())?;

        info!(version = %version, "Created migration {}_{}", version, written.name);
        Ok(CreatedMigration {
            version,
            name: written.name,
            up_path: written.up_path,
            down_path: written.down_path,
        })
    }

    /// Raw script text for a version.
    pub fn read_sql(&self, version: &str, direction: Direction) -> Result<String> {
        self.store.read_sql(version, direction)
    }

    /// Round-trip the database.
    pub async fn test_connection(&self) -> Result<ConnectionStatus> {
        let start = Instant::now();
        self.backend.ping().await?;
        Ok(ConnectionStatus {
            db_type: self.backend.db_type(),
            latency_ms: elapsed_ms(start),
        })
    }

    /// The whole schema, or a single table.
    pub async fn inspect(&self, table: Option<&str>) -> Result<SchemaSnapshot> {
        match table {
            Some(table) => Ok(SchemaSnapshot {
                tables: vec![self.backend.inspect_table(table).await?],
            }),
            None => self.backend.introspect().await,
        }
    }

    /// Run a read query after the guard has cleared it.
    pub async fn run_query(&self, sql: &str) -> Result<QueryOutcome> {
        match self.guard.check(sql) {
            Verdict::Allowed => Ok(QueryOutcome::Rows(self.backend.run_read_only(sql).await?)),
            Verdict::Rejected { keyword, reason } => {
                warn!(keyword = ?keyword, "Rejected query: {}", reason);
                Ok(QueryOutcome::Rejected { keyword, reason })
            }
        }
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteBackend;
    use schemata_core::config::{MalformedPolicy, MigrationsConfig, VersionScheme};
    use schemata_core::DatabaseConfig;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const INITIAL_UP: &str = "CREATE TABLE products (\n    id INTEGER PRIMARY KEY,\n    sku TEXT NOT NULL,\n    price REAL\n);\nCREATE INDEX idx_products_sku ON products (sku);\n";
    const INITIAL_DOWN: &str = "DROP INDEX idx_products_sku;\nDROP TABLE products;\n";

    struct Fixture {
        dir: TempDir,
        engine: MigrationEngine,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir(dir.path().join("migrations")).unwrap();
            let engine = engine_for(dir.path(), MigrationsConfig::default()).await;
            Self { dir, engine }
        }

        fn migrations(&self) -> std::path::PathBuf {
            self.dir.path().join("migrations")
        }

        fn write(&self, file: &str, sql: &str) {
            fs::write(self.migrations().join(file), sql).unwrap();
        }

        async fn row_count(&self, table: &str) -> i64 {
            self.engine.inspect(Some(table)).await.unwrap().tables[0].row_count
        }
    }

    async fn engine_for(root: &Path, mut migrations: MigrationsConfig) -> MigrationEngine {
        migrations.dir = root.join("migrations");
        let config = SchemataConfig {
            database: DatabaseConfig::sqlite(root.join("test.db")),
            migrations,
            ..Default::default()
        };
        let backend = SqliteBackend::connect(&config.database).await.unwrap();
        MigrationEngine::new(Arc::new(backend), MigrationStore::from_config(&config.migrations))
    }

    #[tokio::test]
    async fn test_initial_schema_scenario() {
        let fx = Fixture::new().await;
        fx.write("001_initial_schema.up.sql", INITIAL_UP);
        fx.write("001_initial_schema.down.sql", INITIAL_DOWN);

        let pending = fx.engine.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version, "001");

        let outcome = fx.engine.apply("001", false).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(ref e) if e.version == "001"));

        let status = fx.engine.status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, MigrationState::Applied);
        assert!(status[0].applied_at.is_some());

        let schema = fx.engine.inspect(None).await.unwrap();
        assert!(schema.table("products").is_some());

        fx.write("001_initial_schema.up.sql", &format!("{}\n", INITIAL_UP));
        let drift = fx.engine.check_drift().await.unwrap();
        assert_eq!(drift.len(), 1);
        assert!(drift[0].drifted());
        assert_eq!(drift[0].kind, DriftKind::Modified);

        let status = fx.engine.status().await.unwrap();
        assert_eq!(status[0].state, MigrationState::AppliedWithDrift);
        assert!(status[0].drifted);
    }

    #[tokio::test]
    async fn test_status_partitions_files_and_ledger() {
        let fx = Fixture::new().await;
        fx.write("001_a.up.sql", "CREATE TABLE a (id INTEGER);");
        fx.write("002_b.up.sql", "CREATE TABLE b (id INTEGER);");
        fx.write("003_c.up.sql", "CREATE TABLE c (id INTEGER);");

        fx.engine.apply("001", false).await.unwrap();
        fx.engine.apply("002", false).await.unwrap();
        fs::remove_file(fx.migrations().join("002_b.up.sql")).unwrap();

        let status = fx.engine.status().await.unwrap();
        let states: Vec<_> = status.iter().map(|s| (s.version.as_str(), s.state)).collect();
        assert_eq!(
            states,
            vec![
                ("001", MigrationState::Applied),
                ("002", MigrationState::MissingFile),
                ("003", MigrationState::Pending),
            ]
        );

        let drift = fx.engine.check_drift().await.unwrap();
        assert_eq!(drift[0].kind, DriftKind::Clean);
        assert_eq!(drift[1].kind, DriftKind::MissingFile);
    }

    #[tokio::test]
    async fn test_apply_twice_is_already_applied() {
        let fx = Fixture::new().await;
        fx.write("001_initial_schema.up.sql", INITIAL_UP);

        fx.engine.apply("001", false).await.unwrap();
        assert!(matches!(
            fx.engine.apply("001", false).await,
            Err(SchemataError::AlreadyApplied(v)) if v == "001"
        ));
        assert_eq!(fx.engine.applied().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_unknown_version() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.engine.apply("042", false).await,
            Err(SchemataError::VersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_then_rollback_restores_state() {
        let fx = Fixture::new().await;
        fx.write("001_initial_schema.up.sql", INITIAL_UP);
        fx.write("001_initial_schema.down.sql", INITIAL_DOWN);

        let before = fx.engine.inspect(None).await.unwrap();
        fx.engine.apply("001", false).await.unwrap();
        let outcome = fx.engine.rollback("001", false).await.unwrap();
        assert!(matches!(outcome, RollbackOutcome::RolledBack { ref version, .. } if version == "001"));

        let after = fx.engine.inspect(None).await.unwrap();
        assert_eq!(before.table_names(), after.table_names());
        assert!(after.table("products").is_none());
        assert!(fx.engine.applied().await.unwrap().is_empty());

        let pending = fx.engine.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_errors() {
        let fx = Fixture::new().await;
        fx.write("001_a.up.sql", "CREATE TABLE a (id INTEGER);");

        assert!(matches!(
            fx.engine.rollback("001", false).await,
            Err(SchemataError::NotApplied(_))
        ));
        assert!(matches!(
            fx.engine.rollback_last(false).await,
            Err(SchemataError::NothingApplied)
        ));

        fx.engine.apply("001", false).await.unwrap();
        assert!(matches!(
            fx.engine.rollback("001", false).await,
            Err(SchemataError::NoDownScript(_))
        ));
        assert_eq!(fx.engine.current_version().await.unwrap().as_deref(), Some("001"));
    }

    #[tokio::test]
    async fn test_rollback_last_picks_greatest_version() {
        let fx = Fixture::new().await;
        fx.write("9_a.up.sql", "CREATE TABLE a (id INTEGER);");
        fx.write("9_a.down.sql", "DROP TABLE a;");
        fx.write("10_b.up.sql", "CREATE TABLE b (id INTEGER);");
        fx.write("10_b.down.sql", "DROP TABLE b;");

        let report = fx.engine.apply_all_pending(false).await.unwrap();
        assert!(report.is_success());

        let planned = fx.engine.rollback_last(true).await.unwrap();
        match planned {
            RollbackOutcome::Planned(plan) => {
                assert_eq!(plan.version, "10");
                assert_eq!(plan.statements, vec!["DROP TABLE b"]);
            }
            other => panic!("expected a plan, got {other:?}"),
        }
        assert_eq!(fx.engine.current_version().await.unwrap().as_deref(), Some("10"));

        let outcome = fx.engine.rollback_last(false).await.unwrap();
        assert_eq!(outcome.version(), "10");
        assert_eq!(fx.engine.current_version().await.unwrap().as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let fx = Fixture::new().await;
        fx.write("001_a.up.sql", "CREATE TABLE a (id INTEGER);");
        fx.write(
            "002_b.up.sql",
            "CREATE TABLE b (id INTEGER);\nINSERT INTO missing_table VALUES (1);",
        );
        fx.write("003_c.up.sql", "CREATE TABLE c (id INTEGER);");

        let report = fx.engine.apply_all_pending(false).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].version(), "001");

        let failed = report.failed.as_ref().unwrap();
        assert_eq!(failed.version, "002");
        assert_eq!(failed.statement_index, Some(1));
        assert!(failed.error.contains("missing_table"));
        assert_eq!(report.unattempted, vec!["003".to_string()]);

        let schema = fx.engine.inspect(None).await.unwrap();
        assert!(schema.table("a").is_some());
        assert!(schema.table("b").is_none());
        assert!(schema.table("c").is_none());

        let applied = fx.engine.applied().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].version, "001");
    }

    #[tokio::test]
    async fn test_apply_error_carries_database_message() {
        let fx = Fixture::new().await;
        fx.write("001_bad.up.sql", "SELECT 1;\nINSERT INTO nowhere VALUES (1);");

        match fx.engine.apply("001", false).await {
            Err(SchemataError::Execution {
                version,
                statement_index,
                message,
            }) => {
                assert_eq!(version, "001");
                assert_eq!(statement_index, 1);
                assert!(message.contains("no such table: nowhere"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(fx.engine.applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backslash_literal_keeps_statement_index() {
        let fx = Fixture::new().await;
        fx.write(
            "001_paths.up.sql",
            "CREATE TABLE paths (p TEXT);\nINSERT INTO paths VALUES ('C:\\');\nINSERT INTO nowhere VALUES (1);",
        );

        match fx.engine.apply("001", false).await {
            Err(SchemataError::Execution { statement_index, .. }) => {
                assert_eq!(statement_index, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(fx.engine.inspect(None).await.unwrap().table("paths").is_none());
    }

    #[tokio::test]
    async fn test_trigger_with_case_body_applies() {
        let fx = Fixture::new().await;
        fx.write(
            "001_flags.up.sql",
            "CREATE TABLE p (x INTEGER, flag INTEGER);\n\
             CREATE TRIGGER p_flag AFTER INSERT ON p BEGIN\n\
             UPDATE p SET flag = CASE WHEN NEW.x > 0 THEN 1 ELSE 0 END;\n\
             END;\n",
        );
        fx.engine.apply("001", false).await.unwrap();

        fx.engine
            .backend()
            .execute_in_transaction("seed", &["INSERT INTO p (x) VALUES (5)".to_string()])
            .await
            .unwrap();
        match fx.engine.run_query("SELECT flag FROM p").await.unwrap() {
            QueryOutcome::Rows(result) => assert_eq!(result.rows[0][0], serde_json::json!(1)),
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let fx = Fixture::new().await;
        fx.write("001_initial_schema.up.sql", INITIAL_UP);

        let outcome = fx.engine.apply("001", true).await.unwrap();
        match outcome {
            ApplyOutcome::Planned(plan) => {
                assert_eq!(plan.direction, Direction::Up);
                assert_eq!(plan.statements.len(), 2);
            }
            other => panic!("expected a plan, got {other:?}"),
        }

        let report = fx.engine.apply_all_pending(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.succeeded.len(), 1);

        assert!(fx.engine.inspect(None).await.unwrap().table("products").is_none());
        assert_eq!(fx.engine.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drift_false_until_bytes_change() {
        let fx = Fixture::new().await;
        fx.write("001_a.up.sql", "CREATE TABLE a (id INTEGER);");
        fx.engine.apply("001", false).await.unwrap();

        assert!(!fx.engine.check_drift().await.unwrap()[0].drifted());

        fx.write("001_a.up.sql", "CREATE TABLE a (id INTEGER); ");
        assert!(fx.engine.check_drift().await.unwrap()[0].drifted());
    }

    #[tokio::test]
    async fn test_run_query_guarded() {
        let fx = Fixture::new().await;
        fx.write(
            "001_products.up.sql",
            "CREATE TABLE products (id INTEGER PRIMARY KEY, sku TEXT);\nINSERT INTO products (sku) VALUES ('a'), ('b');",
        );
        fx.engine.apply("001", false).await.unwrap();

        match fx.engine.run_query("SELECT * FROM products").await.unwrap() {
            QueryOutcome::Rows(result) => {
                assert_eq!(result.row_count, 2);
                assert_eq!(result.columns, vec!["id", "sku"]);
            }
            other => panic!("expected rows, got {other:?}"),
        }

        let outcome = fx.engine.run_query("DELETE FROM products").await.unwrap();
        assert!(matches!(
            outcome,
            QueryOutcome::Rejected { keyword: Some(ref k), .. } if k == "DELETE"
        ));
        assert_eq!(fx.row_count("products").await, 2);

        let outcome = fx
            .engine
            .run_query("SELECT 'x\\'; DELETE FROM products; -- '")
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Rejected { .. }));
        assert_eq!(fx.row_count("products").await, 2);
    }

    #[tokio::test]
    async fn test_create_migration_sequence() {
        let dir = TempDir::new().unwrap();
        let engine = engine_for(dir.path(), MigrationsConfig::default()).await;

        let first = engine
            .create_migration("Create products", "CREATE TABLE products (id INTEGER);", Some("DROP TABLE products;"))
            .await
            .unwrap();
        assert_eq!(first.version, "001");
        assert_eq!(first.name, "create_products");
        assert!(first.down_path.is_some());

        let second = engine
            .create_migration("add-sku", "ALTER TABLE products ADD COLUMN sku TEXT;", None)
            .await
            .unwrap();
        assert_eq!(second.version, "002");
        assert!(second.down_path.is_none());

        let pending = engine.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(engine.applied().await.unwrap().is_empty());

        let report = engine.apply_all_pending(false).await.unwrap();
        assert!(report.is_success());

        let down = engine.read_sql("001", Direction::Down).unwrap();
        assert!(down.starts_with("-- Rollback: 001_create_products\n"));
        assert!(down.contains("DROP TABLE products;"));
    }

    #[tokio::test]
    async fn test_create_migration_timestamp_versions() {
        let dir = TempDir::new().unwrap();
        let engine = engine_for(
            dir.path(),
            MigrationsConfig {
                versioning: VersionScheme::Timestamp,
                ..Default::default()
            },
        )
        .await;

        let first = engine.create_migration("one", "SELECT 1;", None).await.unwrap();
        let second = engine.create_migration("two", "SELECT 2;", None).await.unwrap();
        assert_eq!(first.version.len(), 14);
        assert_eq!(
            compare_versions(&first.version, &second.version),
            std::cmp::Ordering::Less
        );
    }

    #[tokio::test]
    async fn test_lenient_store_skips_malformed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("migrations")).unwrap();
        fs::write(dir.path().join("migrations/001_a.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("migrations/notes.sql"), "SELECT 1;").unwrap();

        let strict = engine_for(dir.path(), MigrationsConfig::default()).await;
        assert!(matches!(
            strict.pending().await,
            Err(SchemataError::MalformedFilename { .. })
        ));

        let lenient = engine_for(
            dir.path(),
            MigrationsConfig {
                malformed: MalformedPolicy::Lenient,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(lenient.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_test_connection() {
        let fx = Fixture::new().await;
        let status = fx.engine.test_connection().await.unwrap();
        assert_eq!(status.db_type, schemata_core::DbType::Sqlite);
        assert!(status.latency_ms >= 0);
    }
}
