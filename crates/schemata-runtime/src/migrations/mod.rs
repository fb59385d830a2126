//! Versioned SQL migrations.
//!
//! The [`MigrationStore`] reads `<version>_<name>.up.sql` / `.down.sql`
//! pairs from disk, the [`Ledger`] tracks what has been applied, and the
//! [`MigrationEngine`] reconciles the two.

mod engine;
mod ledger;
mod outcome;
pub mod split;
mod store;

pub use engine::MigrationEngine;
pub use ledger::Ledger;
pub use outcome::{
    ApplyOutcome, BatchReport, ConnectionStatus, CreatedMigration, DriftKind, DriftReport,
    FailedMigration, MigrationPlan, MigrationStatus, QueryOutcome, RollbackOutcome,
};
pub use split::{split_statements, split_statements_for};
pub use store::{checksum, sanitize_name, MigrationStore, WrittenFiles};
