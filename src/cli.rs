// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::Value;

/// Command-line arguments for `workdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workdag",
    version,
    about = "Run a resumable workflow of dependent tasks with bounded parallelism.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Workdag.toml")]
    pub config: PathBuf,

    /// Run parameter, repeatable. Values are parsed as JSON literals when
    /// possible (`42`, `true`, `[1,2]`), otherwise taken as strings.
    #[arg(
        long = "param",
        short = 'p',
        value_name = "KEY=VALUE",
        value_parser = parse_param
    )]
    pub params: Vec<(String, Value)>,

    /// Override `[engine].max_workers`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_workers: Option<u64>,

    /// Ignore existing checkpoints for these parameters and run everything.
    #[arg(long)]
    pub fresh: bool,

    /// Parse + validate, print the execution layers, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
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

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), Value::parse_literal(value)))
}
