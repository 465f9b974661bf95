//! Named-variable persistence
//!
//! The driver keeps the active tool, the filament position and cosmetic slot
//! overrides across restarts. Hosts plug in their own store through
//! [`VariableStore`]; [`JsonFileStore`] keeps everything in one JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// File is not valid JSON
    #[error("invalid variables file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value store for named variables
pub trait VariableStore: Send {
    /// Current value of `name`, if any
    fn get(&self, name: &str) -> Option<Value>;

    /// Set `name`. Implementations may buffer until [`VariableStore::flush`].
    fn set(&mut self, name: &str, value: Value) -> Result<(), StoreError>;

    /// Make every previous `set` durable
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Volatile store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
    flushes: usize,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `flush` was called
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl VariableStore for MemoryStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.flushes += 1;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VariablesFile {
    #[serde(default)]
    modified: String,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
}

/// Store backed by a single JSON document.
///
/// `set` only touches memory; `flush` writes the whole document to a sibling
/// temporary file and renames it over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    file: VariablesFile,
    dirty: bool,
}

impl JsonFileStore {
    /// Default location in the user's data directory
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "Could not find app data directory")
            })?;
        Ok(base.join("acelink").join("variables.json"))
    }

    /// Open `path`, starting empty if the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            VariablesFile::default()
        };

        Ok(Self {
            path,
            file,
            dirty: false,
        })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// RFC 3339 time of the last flush that wrote the file
    pub fn modified(&self) -> &str {
        &self.file.modified
    }
}

impl VariableStore for JsonFileStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.file.variables.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        if self.file.variables.get(name) != Some(&value) {
            self.file.variables.insert(name.to_string(), value);
            self.dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        self.file.modified = Utc::now().to_rfc3339();
        let content = serde_json::to_string_pretty(&self.file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;

        debug!("saved variables to {}", self.path.display());
        Ok(())
    }
}
