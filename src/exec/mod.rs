// src/exec/mod.rs

//! Process execution for workflow-file tasks.
//!
//! Each `[task.<name>]` becomes a [`crate::dag::TaskNode`] whose body runs
//! the configured command through `tokio::process::Command`; the engine
//! treats it like any other async task body.

pub mod command;

pub use command::{command_body, command_graph, run_command};
