//! Migration data model shared by the file store, the ledger and the engine.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compare two migration versions.
///
/// All-digit versions compare by numeric value so that `99` sorts before
/// `100`; ties (`01` vs `1`) and non-numeric versions fall back to plain
/// string order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if numeric(a) && numeric(b) {
        let a_trimmed = a.trim_start_matches('0');
        let b_trimmed = b.trim_start_matches('0');
        a_trimmed
            .len()
            .cmp(&b_trimmed.len())
            .then_with(|| a_trimmed.cmp(b_trimmed))
            .then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

/// Which script of a migration pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// File suffix for this direction.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Up => ".up.sql",
            Self::Down => ".down.sql",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// A migration pair as found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationFile {
    pub version: String,
    pub name: String,
    #[serde(skip)]
    pub up_sql: String,
    #[serde(skip)]
    pub down_sql: Option<String>,
    /// SHA-256 of the up file's exact bytes.
    pub checksum: String,
    pub up_path: PathBuf,
    pub down_path: Option<PathBuf>,
}

impl MigrationFile {
    /// `<version>_<name>`, the file stem without the direction suffix.
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }

    pub fn has_down(&self) -> bool {
        self.down_sql.is_some()
    }

    /// Script text for the given direction.
    pub fn sql(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Up => Some(&self.up_sql),
            Direction::Down => self.down_sql.as_deref(),
        }
    }
}

/// One row of the `schema_migrations` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: String,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: i64,
}

/// Reconciled state of a single version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    /// File present, no ledger row.
    Pending,
    /// Ledger row matches the file.
    Applied,
    /// Ledger row exists but the file's checksum changed since.
    AppliedWithDrift,
    /// Ledger row exists but the file is gone.
    MissingFile,
}

impl MigrationState {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::AppliedWithDrift => "applied-with-drift",
            Self::MissingFile => "missing-file",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions_numeric() {
        assert_eq!(compare_versions("001", "002"), Ordering::Less);
        assert_eq!(compare_versions("99", "100"), Ordering::Less);
        assert_eq!(compare_versions("010", "9"), Ordering::Greater);
        assert_eq!(compare_versions("001", "001"), Ordering::Equal);
        assert_eq!(
            compare_versions("20261018093000", "20261018093001"),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_versions_tie_and_fallback() {
        assert_eq!(compare_versions("01", "1"), Ordering::Less);
        assert_eq!(compare_versions("0", "000"), Ordering::Less);
        assert_eq!(compare_versions("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MigrationState::AppliedWithDrift.to_string(), "applied-with-drift");
        assert!(MigrationState::MissingFile.is_applied());
        assert!(!MigrationState::Pending.is_applied());
    }
}
