pub mod db;
pub mod guard;
pub mod migrations;
pub mod views;

pub use db::{connect, Backend, BackendTransaction, MySqlBackend, PostgresBackend, SqliteBackend};
pub use guard::{QueryGuard, Verdict};
pub use migrations::{
    ApplyOutcome, BatchReport, ConnectionStatus, CreatedMigration, DriftKind, DriftReport,
    FailedMigration, Ledger, MigrationEngine, MigrationPlan, MigrationStatus, MigrationStore,
    QueryOutcome, RollbackOutcome,
};
pub use views::{schema_ddl, status_summary};
