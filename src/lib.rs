// src/lib.rs

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod resource;
pub mod scheduler;
pub mod task;
pub mod types;

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info};

use crate::cache::{CacheStore, DirStore};
use crate::cli::{CacheAction, CliArgs, Command};
use crate::config::{default_request_path, load_and_validate};
use crate::graph::{BuiltGraph, build_from_request};
use crate::resource::{ResourceMonitor, SystemMonitor};
use crate::task::TaskId;

pub use crate::analysis::{Analysis, AnalysisInput, AnalysisRegistry};
pub use crate::dataset::{DatasetHandle, DatasetLoader, InMemoryLoader, Table};
pub use crate::pipeline::{Pipeline, PipelineReport};

/// High-level entry point used by `main.rs`.
///
/// Running analyses needs registered analysis code, so the binary only
/// covers planning and cache maintenance. Programs embedding the crate use
/// [`Pipeline`] directly.
pub fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Plan { request } => {
            let path = request.unwrap_or_else(default_request_path);
            let req = load_and_validate(&path)?;
            let built = build_from_request(&req)?;
            print_plan(&path, &built)?;
        }
        Command::Cache { action } => run_cache(action)?,
    }
    Ok(())
}

fn run_cache(action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats(dir) => {
            let store = DirStore::open(&dir.dir)?;
            let entries = store.list()?;
            let total: u64 = entries.iter().map(|e| e.size).sum();
            println!("cache {}", dir.dir.display());
            println!("  entries: {}", entries.len());
            println!("  bytes:   {total}");
            if let (Some(oldest), Some(newest)) = (entries.first(), entries.last()) {
                println!("  oldest:  {} (created {})", oldest.id.short(), oldest.created);
                println!("  newest:  {} (created {})", newest.id.short(), newest.created);
            }
        }
        CacheAction::Prune { dir, budget_bytes } => {
            let store = DirStore::open(&dir.dir)?;
            let removed = store.prune_to_budget(budget_bytes)?;
            println!("removed {} entries from {}", removed.len(), dir.dir.display());
        }
        CacheAction::Clear(dir) => {
            let store = DirStore::open(&dir.dir)?;
            let removed = store.clear()?;
            println!("removed {removed} entries from {}", dir.dir.display());
        }
    }
    Ok(())
}

/// Tasks in the order an unconstrained pool would dispatch them: by
/// topological rank, ties broken by identity.
pub fn plan_order(built: &BuiltGraph) -> Result<Vec<(usize, TaskId)>> {
    let ranks = built.graph.topological_ranks()?;
    let mut order: Vec<(usize, TaskId)> = ranks.into_iter().map(|(id, r)| (r, id)).collect();
    order.sort();
    Ok(order)
}

/// Dry-run output: tasks with rank, dependencies, estimates and timeouts.
fn print_plan(path: &Path, built: &BuiltGraph) -> Result<()> {
    let order = plan_order(built)?;

    println!("anadag plan: {}", path.display());
    println!("  datasets ({}):", built.datasets.len());
    for (name, handle) in built.datasets.iter() {
        println!(
            "    - {name}: {} (id {}, ~{} bytes, shape {:?})",
            handle.locator(),
            handle.id(),
            handle.byte_size_estimate(),
            handle.shape()
        );
    }
    println!();

    println!("  tasks ({}):", order.len());
    for (rank, id) in order.iter() {
        let Some(node) = built.graph.node(id) else {
            continue;
        };
        println!("    [{rank}] {} ({})", node.label(), id.short());
        println!("        analysis: {}", node.task().analysis());

        let deps: Vec<String> = built
            .graph
            .producers_of(id)
            .iter()
            .filter_map(|p| built.graph.node(p))
            .map(|p| p.label().to_string())
            .collect();
        if !deps.is_empty() {
            println!("        after: {deps:?}");
        }
        if node.estimated_bytes() > 0 {
            println!("        estimate: {} bytes", node.estimated_bytes());
        }
        if let Some(timeout) = node.timeout() {
            println!("        timeout: {timeout:?}");
        }
    }

    let snapshot = SystemMonitor::new().snapshot();
    info!(
        available = snapshot.available_memory_bytes,
        in_use = snapshot.used_memory_bytes,
        "memory at plan time"
    );
    debug!("plan complete (no execution)");
    Ok(())
}
