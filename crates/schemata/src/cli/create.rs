use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{ArgGroup, Parser};
use console::style;

use schemata_core::Direction;

use super::Context;

/// Create a new migration pair.
#[derive(Parser)]
#[command(group(ArgGroup::new("up_source").required(true).args(["up", "up_file"])))]
pub struct CreateCommand {
    /// Migration name, e.g. "add users table".
    pub name: String,

    /// SQL for the up script.
    #[arg(long)]
    pub up: Option<String>,

    /// Read the up script from a file.
    #[arg(long)]
    pub up_file: Option<PathBuf>,

    /// SQL for the down script.
    #[arg(long, conflicts_with = "down_file")]
    pub down: Option<String>,

    /// Read the down script from a file.
    #[arg(long)]
    pub down_file: Option<PathBuf>,
}

impl CreateCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let up_sql = read_source(self.up, self.up_file)?.unwrap_or_default();
        let down_sql = read_source(self.down, self.down_file)?;

        let created = ctx
            .engine
            .create_migration(&self.name, &up_sql, down_sql.as_deref())
            .await?;

        if ctx.json {
            return ctx.print_json(&created);
        }

        println!();
        println!(
            "  {} Created migration {}_{} in {}",
            style("✓").green(),
            created.version,
            created.name,
            ctx.config.migrations.dir.display()
        );
        println!("    {}", style(created.up_path.display()).dim());
        if let Some(down_path) = &created.down_path {
            println!("    {}", style(down_path.display()).dim());
        }
        println!();
        Ok(())
    }
}

/// Print the SQL of a migration.
#[derive(Parser)]
pub struct ShowCommand {
    /// Version (or `<version>_<name>`) to show.
    pub version: String,

    /// Show the down script instead of the up script.
    #[arg(long)]
    pub down: bool,
}

impl ShowCommand {
    pub fn execute(self, ctx: &Context) -> Result<()> {
        let direction = if self.down {
            Direction::Down
        } else {
            Direction::Up
        };
        let sql = ctx.engine.read_sql(&self.version, direction)?;

        if ctx.json {
            return ctx.print_json(&serde_json::json!({
                "version": self.version,
                "direction": direction,
                "sql": sql,
            }));
        }

        print!("{}", sql);
        if !sql.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}

fn read_source(inline: Option<String>, file: Option<PathBuf>) -> Result<Option<String>> {
    match (inline, file) {
        (Some(sql), _) => Ok(Some(sql)),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => Ok(None),
    }
}
