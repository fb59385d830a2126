use anyhow::Result;
use clap::Parser;
use console::style;

use schemata_core::{QueryResult, TableInfo};
use schemata_runtime::{schema_ddl, QueryOutcome};

use super::Context;

/// Describe tables, columns and indexes.
#[derive(Parser)]
pub struct SchemaCommand {
    /// Only this table.
    pub table: Option<String>,
}

impl SchemaCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let snapshot = ctx.engine.inspect(self.table.as_deref()).await?;
        if ctx.json {
            return ctx.print_json(&snapshot);
        }

        println!();
        if snapshot.tables.is_empty() {
            println!("  {} No tables found", style("ℹ").blue());
        }
        for table in &snapshot.tables {
            print_table(table);
        }
        Ok(())
    }
}

/// Run a read-only query.
#[derive(Parser)]
pub struct QueryCommand {
    /// SQL to run. Statements that modify data or schema are refused.
    pub sql: String,
}

impl QueryCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let outcome = ctx.engine.run_query(&self.sql).await?;
        if ctx.json {
            ctx.print_json(&outcome)?;
        }

        match outcome {
            QueryOutcome::Rows(result) => {
                if !ctx.json {
                    print_rows(&result);
                }
                Ok(())
            }
            QueryOutcome::Rejected { reason, .. } => anyhow::bail!("query rejected: {}", reason),
        }
    }
}

pub async fn ddl(ctx: &Context) -> Result<()> {
    let snapshot = ctx.engine.inspect(None).await?;
    let ddl = schema_ddl(&snapshot);
    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "ddl": ddl }));
    }

    println!("{}", ddl);
    Ok(())
}

pub async fn ping(ctx: &Context) -> Result<()> {
    let status = ctx.engine.test_connection().await?;
    if ctx.json {
        return ctx.print_json(&status);
    }

    println!(
        "  {} Connected to {} {}",
        style("✓").green(),
        status.db_type,
        style(format!("({} ms)", status.latency_ms)).dim()
    );
    Ok(())
}

fn print_table(table: &TableInfo) {
    println!(
        "  {} {}",
        style(&table.name).bold().cyan(),
        style(format!("({} rows)", table.row_count)).dim()
    );
    for column in &table.columns {
        let mut flags = Vec::new();
        if column.primary_key {
            flags.push("PK".to_string());
        }
        if !column.nullable {
            flags.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            flags.push(format!("DEFAULT {}", default));
        }
        println!(
            "    {:<24} {:<16} {}",
            column.name,
            column.data_type,
            style(flags.join(" ")).dim()
        );
    }
    for index in &table.indexes {
        println!(
            "    {} {} ({}){}",
            style("idx").dim(),
            index.name,
            index.columns.join(", "),
            if index.unique { " UNIQUE" } else { "" }
        );
    }
    println!();
}

fn print_rows(result: &QueryResult) {
    if !result.columns.is_empty() {
        println!("{}", style(result.columns.join(" | ")).bold());
    }
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "NULL".to_string(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    println!("{}", style(format!("({} rows)", result.row_count)).dim());
}
