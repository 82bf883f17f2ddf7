// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `anadag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "anadag",
    version,
    about = "Plan analysis pipelines and maintain their result cache.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ANADAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Validate a request and print its tasks in dispatch order, without
    /// running anything.
    Plan {
        /// Path to the request file (TOML).
        ///
        /// Default: `ANADAG_REQUEST`, else `Anadag.toml` in the current
        /// working directory.
        #[arg(long, value_name = "PATH")]
        request: Option<PathBuf>,
    },

    /// Inspect or shrink a persisted result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum CacheAction {
    /// Print entry count and total size.
    Stats(CacheDir),

    /// Remove the oldest entries until the cache fits in a budget.
    Prune {
        #[command(flatten)]
        dir: CacheDir,

        #[arg(long, value_name = "BYTES")]
        budget_bytes: u64,
    },

    /// Remove every entry.
    Clear(CacheDir),
}

#[derive(Debug, Clone, Args)]
pub struct CacheDir {
    /// Cache directory.
    #[arg(long, value_name = "DIR", default_value = ".anadag/cache")]
    pub dir: PathBuf,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prune_with_global_log_level() {
        let args = CliArgs::try_parse_from([
            "anadag",
            "cache",
            "prune",
            "--dir",
            "/tmp/c",
            "--budget-bytes",
            "100",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        match args.command {
            Command::Cache {
                action: CacheAction::Prune { dir, budget_bytes },
            } => {
                assert_eq!(dir.dir, PathBuf::from("/tmp/c"));
                assert_eq!(budget_bytes, 100);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn plan_request_is_optional() {
        let args = CliArgs::try_parse_from(["anadag", "plan"]).unwrap();
        assert!(matches!(args.command, Command::Plan { request: None }));
    }
}
