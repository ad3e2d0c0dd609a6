// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a workflow file without semantic validation. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tasks = config.task.len(), "parsed workflow file");

    Ok(config)
}

/// Load a workflow file and validate it: engine settings, limits,
/// parameter declarations and the dependency graph (unknown dependencies,
/// cycles).
///
/// A relative `engine.checkpoint_dir` is resolved against the file's
/// directory so the checkpoint location does not depend on where the
/// process was started.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw_config = load_from_path(path)?;

    if raw_config.engine.checkpoint_dir.is_relative() {
        raw_config.engine.checkpoint_dir = config_root_dir(path).join(&raw_config.engine.checkpoint_dir);
    }

    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// `Workdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Workdag.toml")
}

/// Directory containing the config file; `.` for a bare file name.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
