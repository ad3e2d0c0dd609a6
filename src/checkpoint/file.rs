// src/checkpoint/file.rs

//! File-backed checkpoint store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<run_id>/manifest.json
//! <root>/<run_id>/tasks/<task>.json
//! ```
//!
//! Every write goes to a temporary sibling, is fsync'd, then renamed over
//! the target, so a reader sees either the old or the new file and a
//! record that `record` acknowledged survives a crash. Each task owns its
//! own file, so concurrent writes for different tasks never touch the same
//! path.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::{CheckpointRecord, CheckpointStore, RunManifest};
use crate::errors::CheckpointError;
use crate::types::TaskName;

const MANIFEST_FILENAME: &str = "manifest.json";
const TASKS_DIR: &str = "tasks";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `root`. Directories are created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn tasks_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(TASKS_DIR)
    }

    fn task_path(&self, run_id: &str, task: &str) -> PathBuf {
        self.tasks_dir(run_id).join(task_file_name(task))
    }
}

/// Plain names are used as-is; anything else is hashed so it is always a
/// valid file name.
fn task_file_name(task: &str) -> String {
    let plain = !task.is_empty()
        && task.len() <= 100
        && task
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        format!("{task}.json")
    } else {
        let hash = blake3::hash(task.as_bytes()).to_hex();
        format!("h-{}.json", &hash[..32])
    }
}

#[instrument(level = "trace", skip(value))]
fn write_durable<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let json = serde_json::to_vec_pretty(value)?;

    let dir = path
        .parent()
        .ok_or_else(|| CheckpointError::Unavailable(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir.display(), e))?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp_name);

    {
        let mut file = fs::File::create(&tmp).map_err(|e| CheckpointError::io(tmp.display(), e))?;
        file.write_all(&json)
            .map_err(|e| CheckpointError::io(tmp.display(), e))?;
        file.sync_all()
            .map_err(|e| CheckpointError::io(tmp.display(), e))?;
    }

    fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path.display(), e))?;

    // Persist the rename itself. Not every platform lets us open a
    // directory for syncing; the data is already on disk by now.
    if let Ok(dir_handle) = fs::File::open(dir) {
        if let Err(e) = dir_handle.sync_all() {
            warn!(dir = %dir.display(), error = %e, "failed to sync checkpoint directory");
        }
    }
    Ok(())
}

#[instrument(level = "trace")]
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CheckpointError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CheckpointError::io(path.display(), e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CheckpointError::Corrupt {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, run_id: &str) -> Result<BTreeMap<TaskName, CheckpointRecord>, CheckpointError> {
        let dir = self.tasks_dir(run_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(CheckpointError::io(dir.display(), e)),
        };

        let mut records = BTreeMap::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CheckpointError::io(dir.display(), e))?
                .path();

            // Leftover temp files come from writes interrupted before the
            // rename; they were never acknowledged.
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            if let Some(record) = read_json::<CheckpointRecord>(&path)? {
                records.insert(record.task_name.clone(), record);
            }
        }

        debug!(run_id, count = records.len(), dir = %dir.display(), "loaded checkpoint records");
        Ok(records)
    }

    fn record(
        &self,
        run_id: &str,
        task: &str,
        record: &CheckpointRecord,
    ) -> Result<(), CheckpointError> {
        let path = self.task_path(run_id, task);
        write_durable(&path, record)?;
        debug!(run_id, task, status = ?record.status, "checkpoint recorded");
        Ok(())
    }

    fn exists(&self, run_id: &str, task: &str) -> Result<bool, CheckpointError> {
        Ok(self.task_path(run_id, task).is_file())
    }

    fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        let dir = self.run_dir(run_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(run_id, dir = %dir.display(), "cleared checkpoints");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(dir.display(), e)),
        }
    }

    fn load_manifest(&self, run_id: &str) -> Result<Option<RunManifest>, CheckpointError> {
        read_json(&self.run_dir(run_id).join(MANIFEST_FILENAME))
    }

    fn save_manifest(&self, run_id: &str, manifest: &RunManifest) -> Result<(), CheckpointError> {
        write_durable(&self.run_dir(run_id).join(MANIFEST_FILENAME), manifest)
    }
}
