// src/config/mod.rs

//! Workflow files.
//!
//! - `model.rs` is the TOML-backed data model.
//! - `loader.rs` reads a file from disk.
//! - `validate.rs` turns a raw file into a validated [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, EngineSection, RawConfigFile, TaskConfig};
