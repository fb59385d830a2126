pub mod config;
pub mod error;
pub mod log;
pub mod migration;
pub mod schema;

pub use config::{DatabaseConfig, DbType, SchemataConfig};
pub use error::{ErrorKind, Result, SchemataError};
pub use log::LogLevel;
pub use migration::{compare_versions, Direction, LedgerEntry, MigrationFile, MigrationState};
pub use schema::{ColumnInfo, IndexInfo, QueryResult, SchemaSnapshot, TableInfo};
