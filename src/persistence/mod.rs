//! Persistence layer: atomic, lock-serialized writes to per-domain YAML data
//! files (spec.md §4.8).
//!
//! Grounded on the teacher's checkpoint-directory locking and atomic-rename
//! helpers (`dashflow::checkpoint::{acquire_exclusive_lock, atomic_write_file_sync}`):
//! an advisory `fs2` exclusive lock serializes writers to the same file, and
//! every write goes to a uniquely-named temp file that is fsynced then
//! renamed into place, so a crash mid-write never corrupts the data file.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yml::{Mapping, Value};

use crate::domain::item::ItemRecord;
use crate::error::{Error, Result};

fn lock_file_path(data_path: &Path) -> PathBuf {
    let mut name = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    name.push_str(".lock");
    data_path.with_file_name(format!(".{name}"))
}

/// Acquire a blocking exclusive lock on `data_path`'s companion lock file.
/// The returned `File` must be kept alive for the duration of the critical
/// section; dropping it releases the lock.
fn acquire_exclusive_lock(data_path: &Path) -> Result<std::fs::File> {
    let lock_path = lock_file_path(data_path);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| Error::persistence(format!("cannot open lock file: {e}")))?;
    fs2::FileExt::lock_exclusive(&file)
        .map_err(|e| Error::persistence(format!("cannot acquire exclusive lock: {e}")))?;
    Ok(file)
}

/// Write `data` to `path` via temp-file-then-rename so a reader never
/// observes a partially-written file.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("data.yaml"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(temp_name);

    {
        let mut file = std::fs::File::create(&temp_path)
            .map_err(|e| Error::persistence(format!("cannot create temp file: {e}")))?;
        file.write_all(data)
            .map_err(|e| Error::persistence(format!("cannot write temp file: {e}")))?;
        file.sync_all()
            .map_err(|e| Error::persistence(format!("cannot fsync temp file: {e}")))?;
    }

    std::fs::rename(&temp_path, path)
        .map_err(|e| Error::persistence(format!("cannot rename temp file into place: {e}")))?;

    Ok(())
}

/// A single domain's YAML data file (`data/<domain>/<Domain>.yaml`), rooted
/// under `root_key` (`materials` | `contaminants` | `compounds` | `settings`).
pub struct YamlFileStore {
    path: PathBuf,
    root_key: String,
}

impl YamlFileStore {
    /// Reference a YAML data file at `path`, rooted under `root_key`.
    #[must_use]
    pub fn new(path: PathBuf, root_key: impl Into<String>) -> Self {
        Self {
            path,
            root_key: root_key.into(),
        }
    }

    /// Load the entire root mapping (`root_key -> { item_id -> fields }`).
    /// Fails with `Error::Data` if the file or root key is missing.
    pub fn load_root(&self) -> Result<Mapping> {
        if !self.path.exists() {
            return Err(Error::data(format!(
                "data file not found: {}",
                self.path.display()
            )));
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::data(format!("cannot read {}: {e}", self.path.display())))?;
        let doc: Value = serde_yml::from_str(&text)?;
        let root = doc
            .as_mapping()
            .and_then(|m| m.get(Value::from(self.root_key.as_str())))
            .and_then(Value::as_mapping)
            .ok_or_else(|| {
                Error::data(format!(
                    "root key '{}' missing from {}",
                    self.root_key,
                    self.path.display()
                ))
            })?;
        Ok(root.clone())
    }

    /// Return just the one item's fields, or `Error::Data` if absent.
    pub fn load_item(&self, item_id: &str) -> Result<Mapping> {
        let root = self.load_root()?;
        root.get(Value::from(item_id))
            .and_then(Value::as_mapping)
            .cloned()
            .ok_or_else(|| Error::data(format!("item '{item_id}' not found")))
    }

    /// Write `text` under `item[key_path]`, re-reading the current file
    /// under an exclusive lock, merging the one change, and writing back
    /// atomically. Preserves existing key order at every level; only the
    /// touched leaf changes. This is the unconditional, always-overwrite
    /// save required by spec.md §4.7/§4.8 — there is no "already populated"
    /// short-circuit anywhere in this path.
    pub fn save(&self, item_id: &str, key_path: &str, text: &str) -> Result<()> {
        let _lock = acquire_exclusive_lock(&self.path)?;

        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::data(format!("cannot read {}: {e}", self.path.display())))?;
        let mut doc: Value = serde_yml::from_str(&raw)?;

        let root = doc
            .as_mapping_mut()
            .and_then(|m| m.get_mut(Value::from(self.root_key.as_str())))
            .ok_or_else(|| {
                Error::data(format!("root key '{}' missing from data file", self.root_key))
            })?;
        let root_map = root
            .as_mapping_mut()
            .ok_or_else(|| Error::data("root key is not a mapping"))?;

        let item = root_map
            .get_mut(Value::from(item_id))
            .ok_or_else(|| Error::data(format!("item '{item_id}' not found")))?;
        let item_map = item
            .as_mapping_mut()
            .ok_or_else(|| Error::data(format!("item '{item_id}' is not a mapping")))?;

        let mut record = ItemRecord::new(item_id.to_string(), std::mem::take(item_map));
        record.set_component(key_path, text);
        *item_map = record.into_fields();

        let serialized = serde_yml::to_string(&doc)?;
        atomic_write(&self.path, serialized.as_bytes())
    }
}
