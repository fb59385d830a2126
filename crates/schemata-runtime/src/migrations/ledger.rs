use std::sync::Arc;

use tracing::debug;

use schemata_core::error::{Result, SchemataError};
use schemata_core::{compare_versions, LedgerEntry};

use crate::db::{Backend, BackendTransaction};

/// The `schema_migrations` table.
#[derive(Clone)]
pub struct Ledger {
    backend: Arc<dyn Backend>,
}

impl Ledger {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create the table if it doesn't exist.
    pub async fn ensure(&self) -> Result<()> {
        self.backend.ensure_ledger_table().await?;
        debug!("Ledger table ready");
        Ok(())
    }

    /// All entries, ascending by version.
    pub async fn load(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.backend.load_ledger().await?;
        entries.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(entries)
    }

    /// Insert `entry` in its own transaction.
    pub async fn record(&self, entry: &LedgerEntry) -> Result<()> {
        let mut tx = self.backend.begin().await?;
        if let Err(e) = Self::record_in(tx.as_mut(), entry).await {
            crate::db::abort(tx).await;
            return Err(e);
        }
        tx.commit().await
    }

    /// Insert `entry` inside an open transaction.
    pub async fn record_in(tx: &mut dyn BackendTransaction, entry: &LedgerEntry) -> Result<()> {
        tx.insert_ledger_entry(entry).await.map_err(|e| {
            if e.is_unique_violation() {
                SchemataError::DuplicateVersion(entry.version.clone())
            } else {
                e
            }
        })?;
        debug!(version = %entry.version, "Recorded ledger entry");
        Ok(())
    }

    /// Delete the entry for `version` in its own transaction.
    pub async fn remove(&self, version: &str) -> Result<()> {
        let mut tx = self.backend.begin().await?;
        if let Err(e) = Self::remove_in(tx.as_mut(), version).await {
            crate::db::abort(tx).await;
            return Err(e);
        }
        tx.commit().await
    }

    /// Delete the entry for `version` inside an open transaction.
    pub async fn remove_in(tx: &mut dyn BackendTransaction, version: &str) -> Result<()> {
        if !tx.delete_ledger_entry(version).await? {
            return Err(SchemataError::NotApplied(version.to_string()));
        }
        debug!(version, "Removed ledger entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteBackend;
    use chrono::Utc;
    use schemata_core::DatabaseConfig;
    use tempfile::TempDir;

    fn entry(version: &str) -> LedgerEntry {
        LedgerEntry {
            version: version.to_string(),
            name: format!("m{}", version),
            checksum: "0".repeat(64),
            applied_at: Utc::now(),
            execution_time_ms: 1,
        }
    }

    async fn ledger(dir: &TempDir) -> Ledger {
        let backend = SqliteBackend::connect(&DatabaseConfig::sqlite(dir.path().join("ledger.db")))
            .await
            .unwrap();
        let ledger = Ledger::new(Arc::new(backend));
        ledger.ensure().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_load_sorted_by_version() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;

        for version in ["10", "9", "100"] {
            ledger.record(&entry(version)).await.unwrap();
        }

        let versions: Vec<_> = ledger
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec!["9", "10", "100"]);
    }

    #[tokio::test]
    async fn test_duplicate_record() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;

        ledger.record(&entry("001")).await.unwrap();
        assert!(matches!(
            ledger.record(&entry("001")).await,
            Err(SchemataError::DuplicateVersion(v)) if v == "001"
        ));
        assert_eq!(ledger.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_applied() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir).await;

        ledger.record(&entry("001")).await.unwrap();
        ledger.remove("001").await.unwrap();
        assert!(matches!(
            ledger.remove("001").await,
            Err(SchemataError::NotApplied(_))
        ));
    }
}
