//! Plain-text renderings for passive display.

use std::fmt::Write;

use schemata_core::config::DbType;
use schemata_core::{compare_versions, MigrationState, SchemaSnapshot, TableInfo};

use crate::migrations::MigrationStatus;

/// Human-readable migration status report.
pub fn status_summary(db_type: DbType, statuses: &[MigrationStatus]) -> String {
    let applied: Vec<&MigrationStatus> = statuses.iter().filter(|s| s.state.is_applied()).collect();
    let pending: Vec<&MigrationStatus> = statuses
        .iter()
        .filter(|s| s.state == MigrationState::Pending)
        .collect();
    let drifted: Vec<&MigrationStatus> = statuses.iter().filter(|s| s.drifted).collect();
    let current = applied
        .iter()
        .map(|s| s.version.as_str())
        .max_by(|a, b| compare_versions(a, b));

    let mut out = String::new();
    let _ = writeln!(out, "DATABASE MIGRATION STATUS");
    let _ = writeln!(out, "=========================");
    let _ = writeln!(out, "Database Type: {}", db_type);
    let _ = writeln!(out, "Current Version: {}", current.unwrap_or("(none)"));
    let _ = writeln!(out, "Applied: {}", applied.len());
    let _ = writeln!(out, "Pending: {}", pending.len());
    let _ = writeln!(out, "Drift Detected: {}", drifted.len());

    out.push_str("\nPENDING MIGRATIONS:\n");
    write_list(&mut out, &pending);
    out.push_str("\nAPPLIED MIGRATIONS:\n");
    write_list(&mut out, &applied);

    if !drifted.is_empty() {
        out.push_str("\nDRIFT DETECTED:\n");
        for status in drifted {
            let reason = match status.state {
                MigrationState::MissingFile => "file missing",
                _ => "checksum mismatch",
            };
            let _ = writeln!(out, "  - {}: {}", status.version, reason);
        }
    }

    out
}

fn write_list(out: &mut String, statuses: &[&MigrationStatus]) {
    if statuses.is_empty() {
        out.push_str("  (none)\n");
    }
    for status in statuses {
        let _ = writeln!(out, "  - {}", status.full_name());
    }
}

/// The schema rendered as `CREATE TABLE` / `CREATE INDEX` statements.
pub fn schema_ddl(snapshot: &SchemaSnapshot) -> String {
    if snapshot.tables.is_empty() {
        return "(No tables found)".to_string();
    }

    snapshot
        .tables
        .iter()
        .map(table_ddl)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn table_ddl(table: &TableInfo) -> String {
    let primary_keys: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    let inline_pk = primary_keys.len() == 1;

    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut line = format!("    {} {}", column.name, column.data_type);
            if inline_pk && column.primary_key {
                line.push_str(" PRIMARY KEY");
            } else if !column.nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                let _ = write!(line, " DEFAULT {}", default);
            }
            line
        })
        .collect();
    if primary_keys.len() > 1 {
        lines.push(format!("    PRIMARY KEY ({})", primary_keys.join(", ")));
    }

    let mut ddl = format!("CREATE TABLE {} (\n{}\n);", table.name, lines.join(",\n"));

    for index in &table.indexes {
        // Indexes backing the primary key are implied by the table definition.
        if index.unique && !primary_keys.is_empty() && index.columns == primary_keys {
            continue;
        }
        let statement = match &index.definition {
            Some(definition) => definition.trim_end_matches(';').to_string(),
            None => format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                index.name,
                table.name,
                index.columns.join(", ")
            ),
        };
        let _ = write!(ddl, "\n{};", statement);
    }

    ddl
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_core::{ColumnInfo, IndexInfo};

    fn status(version: &str, state: MigrationState) -> MigrationStatus {
        MigrationStatus {
            version: version.to_string(),
            name: format!("m{}", version),
            state,
            applied_at: None,
            execution_time_ms: None,
            checksum: None,
            stored_checksum: None,
            drifted: matches!(
                state,
                MigrationState::AppliedWithDrift | MigrationState::MissingFile
            ),
        }
    }

    #[test]
    fn test_status_summary() {
        let statuses = vec![
            status("001", MigrationState::Applied),
            status("002", MigrationState::AppliedWithDrift),
            status("003", MigrationState::Pending),
        ];

        let summary = status_summary(DbType::Sqlite, &statuses);
        assert!(summary.contains("Database Type: sqlite"));
        assert!(summary.contains("Current Version: 002"));
        assert!(summary.contains("Applied: 2"));
        assert!(summary.contains("Pending: 1"));
        assert!(summary.contains("PENDING MIGRATIONS:\n  - 003_m003\n"));
        assert!(summary.contains("  - 002: checksum mismatch"));
    }

    #[test]
    fn test_status_summary_empty() {
        let summary = status_summary(DbType::Postgres, &[]);
        assert!(summary.contains("Current Version: (none)"));
        assert!(summary.contains("PENDING MIGRATIONS:\n  (none)\n"));
        assert!(!summary.contains("DRIFT DETECTED"));
    }

    #[test]
    fn test_schema_ddl() {
        let snapshot = SchemaSnapshot {
            tables: vec![TableInfo {
                name: "products".into(),
                columns: vec![
                    ColumnInfo {
                        name: "id".into(),
                        data_type: "INTEGER".into(),
                        nullable: false,
                        default: None,
                        primary_key: true,
                    },
                    ColumnInfo {
                        name: "price".into(),
                        data_type: "REAL".into(),
                        nullable: false,
                        default: Some("0".into()),
                        primary_key: false,
                    },
                ],
                indexes: vec![
                    IndexInfo {
                        name: "products_pkey".into(),
                        columns: vec!["id".into()],
                        unique: true,
                        definition: None,
                    },
                    IndexInfo {
                        name: "idx_price".into(),
                        columns: vec!["price".into()],
                        unique: false,
                        definition: None,
                    },
                ],
                row_count: 0,
            }],
        };

        assert_eq!(
            schema_ddl(&snapshot),
            "CREATE TABLE products (\n    id INTEGER PRIMARY KEY,\n    price REAL NOT NULL DEFAULT 0\n);\nCREATE INDEX idx_price ON products (price);"
        );
    }

    #[test]
    fn test_schema_ddl_empty() {
        assert_eq!(schema_ddl(&SchemaSnapshot::default()), "(No tables found)");
    }
}
