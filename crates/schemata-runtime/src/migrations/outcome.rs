//! Results returned by [`MigrationEngine`](super::MigrationEngine) operations.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use schemata_core::config::DbType;
use schemata_core::{Direction, LedgerEntry, MigrationState, QueryResult};

/// Reconciled view of one version.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    /// Checksum of the file as it is now. `None` when the file is gone.
    pub checksum: Option<String>,
    /// Checksum recorded when the version was applied.
    pub stored_checksum: Option<String>,
    pub drifted: bool,
}

impl MigrationStatus {
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

/// What a dry run would execute.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub version: String,
    pub name: String,
    pub direction: Direction,
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Planned(MigrationPlan),
    Applied(LedgerEntry),
}

impl ApplyOutcome {
    pub fn version(&self) -> &str {
        match self {
            Self::Planned(plan) => &plan.version,
            Self::Applied(entry) => &entry.version,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    Planned(MigrationPlan),
    RolledBack {
        version: String,
        name: String,
        execution_time_ms: i64,
    },
}

impl RollbackOutcome {
    pub fn version(&self) -> &str {
        match self {
            Self::Planned(plan) => &plan.version,
            Self::RolledBack { version, .. } => version,
        }
    }
}

/// The migration that stopped a batch.
#[derive(Debug, Clone, Serialize)]
pub struct FailedMigration {
    pub version: String,
    pub name: String,
    pub error: String,
    pub statement_index: Option<usize>,
}

/// Result of applying every pending migration in order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub dry_run: bool,
    pub total: usize,
    pub succeeded: Vec<ApplyOutcome>,
    pub failed: Option<FailedMigration>,
    /// Versions after the failure that were never started.
    pub unattempted: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftKind {
    Clean,
    Modified,
    MissingFile,
}

impl DriftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Modified => "modified",
            Self::MissingFile => "missing-file",
        }
    }
}

/// Comparison of a ledger checksum with the file on disk.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub version: String,
    pub name: String,
    pub stored_checksum: String,
    pub current_checksum: Option<String>,
    pub kind: DriftKind,
}

impl DriftReport {
    pub fn drifted(&self) -> bool {
        self.kind != DriftKind::Clean
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedMigration {
    pub version: String,
    pub name: String,
    pub up_path: PathBuf,
    pub down_path: Option<PathBuf>,
}

/// Result of an ad-hoc read query.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows(QueryResult),
    /// Refused before reaching the database.
    Rejected {
        keyword: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub db_type: DbType,
    pub latency_ms: i64,
}
