//! Keys command - print structural cache keys without solving

use crate::cache::CacheManager;
use crate::cli::args::{KeysArgs, OutputFormat};
use crate::config::Config;
use crate::context::Context;
use crate::definition;
use crate::error::KilnResult;
use crate::solver::{Solver, SolverOptions};
use crate::ui::{self, UiContext};
use crate::worker::local::LocalWorker;
use console::style;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct KeyRow {
    name: String,
    kind: &'static str,
    digest: String,
    cache_key: String,
}

/// Execute the keys command
pub async fn execute(args: KeysArgs, config: &Config) -> KilnResult<()> {
    let definition = definition::load(&args.file)?;
    let names: Vec<(String, _)> = definition
        .names()
        .map(|(name, id)| (name.to_string(), id))
        .collect();

    // Keys never run anything; the worker is only needed to build the ops.
    let solver = Solver::new(
        definition.graph,
        &CacheManager::new(),
        Arc::new(LocalWorker::from_config(&config.worker)),
        SolverOptions::from_config(&config.solver),
    );

    let ctx = Context::background();
    let mut rows = Vec::with_capacity(names.len());
    for (name, id) in names {
        let vertex = solver.graph().vertex(id);
        rows.push(KeyRow {
            kind: vertex.sys().kind(),
            digest: vertex.digest().to_string(),
            cache_key: solver.cache_key(&ctx, id).await?.to_string(),
            name,
        });
    }

    match args.format {
        OutputFormat::Table => print_table(&rows),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{}\t{}\t{}", row.name, row.kind, row.cache_key);
            }
        }
    }

    Ok(())
}

fn print_table(rows: &[KeyRow]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Cache keys");

    println!(
        "{:<20} {:<8} {:<14} {:<14}",
        style("NAME").bold(),
        style("KIND").bold(),
        style("DIGEST").bold(),
        style("CACHE KEY").bold()
    );
    println!("{}", "-".repeat(58));

    for row in rows {
        println!(
            "{:<20} {:<8} {:<14} {:<14}",
            row.name,
            style(row.kind).cyan(),
            short(&row.digest),
            short(&row.cache_key)
        );
    }

    println!();
    println!("{} vertex(es)", rows.len());
}

/// First 12 hex characters of a `sha256:` digest
fn short(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    hex.get(..12).unwrap_or(hex)
}
