//! Keyed state storage with two lifetimes.
//!
//! [`StateScope::Session`] holds values tied to the current session token and is wiped on
//! rotation. [`StateScope::Durable`] survives rotation and restarts.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{to_writer_pretty, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    Session,
    Durable,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state document is not valid json: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("value under '{key}' has an unexpected shape: {reason}")]
    Shape { key: String, reason: String },
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, scope: StateScope, key: &str) -> Result<Option<Value>, StateError>;
    async fn save(&self, scope: StateScope, key: &str, value: Value) -> Result<(), StateError>;
    async fn remove(&self, scope: StateScope, key: &str) -> Result<bool, StateError>;
    async fn clear_scope(&self, scope: StateScope) -> Result<(), StateError>;
}

/// Load and deserialize `key`, `None` when absent.
pub async fn load_typed<T>(
    store: &dyn StateStore,
    scope: StateScope,
    key: &str,
) -> Result<Option<T>, StateError>
where
    T: DeserializeOwned,
{
    let Some(value) = store.load(scope, key).await? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| StateError::Shape {
            key: key.to_string(),
            reason: err.to_string(),
        })
}

pub async fn save_typed<T>(
    store: &dyn StateStore,
    scope: StateScope,
    key: &str,
    value: &T,
) -> Result<(), StateError>
where
    T: Serialize + Sync,
{
    let value = serde_json::to_value(value)?;
    store.save(scope, key, value).await
}

#[derive(Default)]
pub struct InMemoryStateStore {
    values: DashMap<(StateScope, String), Value>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, scope: StateScope, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self
            .values
            .get(&(scope, key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, scope: StateScope, key: &str, value: Value) -> Result<(), StateError> {
        self.values.insert((scope, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, scope: StateScope, key: &str) -> Result<bool, StateError> {
        Ok(self.values.remove(&(scope, key.to_string())).is_some())
    }

    async fn clear_scope(&self, scope: StateScope) -> Result<(), StateError> {
        self.values.retain(|(entry_scope, _), _| *entry_scope != scope);
        Ok(())
    }
}

/// On-disk shape of [`JsonFileStateStore`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub session: BTreeMap<String, Value>,
    #[serde(default)]
    pub durable: BTreeMap<String, Value>,
}

impl StateDocument {
    fn section(&self, scope: StateScope) -> &BTreeMap<String, Value> {
        match scope {
            StateScope::Session => &self.session,
            StateScope::Durable => &self.durable,
        }
    }

    fn section_mut(&mut self, scope: StateScope) -> &mut BTreeMap<String, Value> {
        match scope {
            StateScope::Session => &mut self.session,
            StateScope::Durable => &mut self.durable,
        }
    }
}

/// Single JSON document, rewritten in full on every mutation.
pub struct JsonFileStateStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl JsonFileStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let file = File::open(&path).map_err(|source| StateError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_reader(BufReader::new(file)) {
                Ok(document) => document,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "state file unreadable; starting empty");
                    StateDocument::default()
                }
            }
        } else {
            StateDocument::default()
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> StateDocument {
        self.document.lock().clone()
    }

    fn write_document(&self, document: &StateDocument) -> Result<(), StateError> {
        let io_err = |source: io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let file = File::create(&tmp).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, document)?;
        writer.flush().map_err(io_err)?;
        drop(writer);
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "state document written");
        Ok(())
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut StateDocument) -> R) -> Result<R, StateError> {
        let mut guard = self.document.lock();
        let result = apply(&mut *guard);
        self.write_document(&guard)?;
        Ok(result)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self, scope: StateScope, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self.document.lock().section(scope).get(key).cloned())
    }

    async fn save(&self, scope: StateScope, key: &str, value: Value) -> Result<(), StateError> {
        self.mutate(|doc| {
            doc.section_mut(scope).insert(key.to_string(), value);
        })
    }

    async fn remove(&self, scope: StateScope, key: &str) -> Result<bool, StateError> {
        self.mutate(|doc| doc.section_mut(scope).remove(key).is_some())
    }

    async fn clear_scope(&self, scope: StateScope) -> Result<(), StateError> {
        self.mutate(|doc| doc.section_mut(scope).clear())
    }
}
