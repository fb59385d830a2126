mod create;
mod inspect;
mod migrate;

pub use create::{CreateCommand, ShowCommand};
pub use inspect::{QueryCommand, SchemaCommand};
pub use migrate::{ApplyCommand, RollbackCommand, RollbackLastCommand, UpCommand};

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use schemata_core::config::{LoggingConfig, SchemataConfig};
use schemata_runtime::MigrationEngine;

/// schemata - versioned SQL migrations for SQLite, PostgreSQL and MySQL
#[derive(Parser)]
#[command(name = "schemata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path.
    #[arg(short, long, default_value = "schemata.toml", global = true)]
    pub config: PathBuf,

    /// Migrations directory (overrides the configuration).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show every migration and its state.
    Status,

    /// List migrations that have not been applied.
    Pending,

    /// Apply a single migration.
    Apply(ApplyCommand),

    /// Apply all pending migrations in order.
    Up(UpCommand),

    /// Roll back an applied migration.
    Rollback(RollbackCommand),

    /// Roll back the most recently versioned migration.
    RollbackLast(RollbackLastCommand),

    /// Check applied migrations for modified or missing files.
    Drift,

    /// Create a new migration pair.
    Create(CreateCommand),

    /// Print the SQL of a migration.
    Show(ShowCommand),

    /// Describe tables, columns and indexes.
    Schema(SchemaCommand),

    /// Print the schema as DDL.
    Ddl,

    /// Run a read-only query.
    Query(QueryCommand),

    /// Test the database connection.
    Ping,
}

/// Shared state for a single invocation.
pub struct Context {
    pub engine: MigrationEngine,
    pub config: SchemataConfig,
    pub json: bool,
}

impl Context {
    /// Print `value` as pretty JSON.
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let mut config = SchemataConfig::load(Some(self.config.as_path()))?;
        if let Some(dir) = self.migrations_dir {
            config.migrations.dir = dir;
        }
        init_tracing(&config.logging);
        debug!(
            target_db = %config.database.describe(),
            migrations = %config.migrations.dir.display(),
            "Configuration loaded"
        );

        let engine = MigrationEngine::from_config(&config).await?;
        let ctx = Context {
            engine,
            config,
            json: self.json,
        };

        let result = match self.command {
            Commands::Status => migrate::status(&ctx).await,
            Commands::Pending => migrate::pending(&ctx).await,
            Commands::Apply(cmd) => cmd.execute(&ctx).await,
            Commands::Up(cmd) => cmd.execute(&ctx).await,
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
            Commands::RollbackLast(cmd) => cmd.execute(&ctx).await,
            Commands::Drift => migrate::drift(&ctx).await,
            Commands::Create(cmd) => cmd.execute(&ctx).await,
            Commands::Show(cmd) => cmd.execute(&ctx),
            Commands::Schema(cmd) => cmd.execute(&ctx).await,
            Commands::Ddl => inspect::ddl(&ctx).await,
            Commands::Query(cmd) => cmd.execute(&ctx).await,
            Commands::Ping => inspect::ping(&ctx).await,
        };

        ctx.engine.close().await;
        result
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.filter_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Ask for confirmation on stdin. Anything but `y`/`yes` declines.
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("  {} {} [y/N] ", style("?").yellow(), prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::try_parse_from(["schemata", "status", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_parse_apply_dry_run() {
        let cli = Cli::try_parse_from(["schemata", "apply", "001", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Apply(cmd) => {
                assert_eq!(cmd.version, "001");
                assert!(cmd.dry_run);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_cli_parse_rollback_yes() {
        let cli = Cli::try_parse_from(["schemata", "rollback", "002", "-y"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback(ref cmd) if cmd.yes && cmd.version == "002"));

        let cli = Cli::try_parse_from(["schemata", "rollback-last", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::RollbackLast(ref cmd) if cmd.yes));
    }

    #[test]
    fn test_cli_parse_create_requires_up() {
        assert!(Cli::try_parse_from(["schemata", "create", "add_users"]).is_err());
        assert!(Cli::try_parse_from([
            "schemata",
            "create",
            "add_users",
            "--up",
            "CREATE TABLE users (id INT);",
            "--up-file",
            "up.sql",
        ])
        .is_err());

        let cli = Cli::try_parse_from([
            "schemata",
            "--migrations-dir",
            "db",
            "create",
            "add_users",
            "--up",
            "CREATE TABLE users (id INT);",
        ])
        .unwrap();
        assert_eq!(cli.migrations_dir, Some(PathBuf::from("db")));
    }

    #[test]
    fn test_cli_parse_schema_and_query() {
        assert!(Cli::try_parse_from(["schemata", "schema"]).is_ok());
        assert!(Cli::try_parse_from(["schemata", "schema", "products"]).is_ok());
        assert!(Cli::try_parse_from(["schemata", "query", "SELECT 1"]).is_ok());
        assert!(Cli::try_parse_from(["schemata", "query"]).is_err());
    }
}
