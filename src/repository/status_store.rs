use crate::error::{AppError, Result};
use crate::models::{ExecutionRecord, StatusPatch};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Durable execution-status store: an in-memory table mirrored to a single
/// JSON document on disk. One mutex guards both the table and the file
/// write, so readers always observe a consistent snapshot and every
/// mutation is flushed before the call returns.
pub struct StatusStore {
    inner: Mutex<Inner>,
}

struct Inner {
    path: PathBuf,
    table: HashMap<String, ExecutionRecord>,
}

impl StatusStore {
    /// Loads the backing file if present, otherwise writes an empty table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existed = path.is_file();
        let table = if existed {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                AppError::Setup(format!(
                    "Status db {} is malformed: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            HashMap::new()
        };

        let store = Self {
            inner: Mutex::new(Inner { path, table }),
        };

        if !existed {
            let inner = store.lock();
            Self::flush(&inner)?;
        }

        Ok(store)
    }

    /// Allocates a fresh id, stores the record under it and flushes.
    /// Returns the id; the record's own `id` field is overwritten.
    pub fn insert(&self, mut record: ExecutionRecord) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        record.id = id.clone();

        let mut inner = self.lock();
        inner.table.insert(id.clone(), record);
        Self::flush(&inner)?;
        Ok(id)
    }

    /// Applies `patch` to every record matching `predicate`; flushes once
    /// if anything changed. Returns the ids of affected records.
    pub fn update<P>(&self, patch: &StatusPatch, predicate: P) -> Result<Vec<String>>
    where
        P: Fn(&ExecutionRecord) -> bool,
    {
        let mut inner = self.lock();
        let mut affected = Vec::new();
        for (id, record) in inner.table.iter_mut() {
            if predicate(record) && patch.apply(record) {
                affected.push(id.clone());
            }
        }
        if !affected.is_empty() {
            Self::flush(&inner)?;
        }
        Ok(affected)
    }

    /// Patch one record by id. Returns false when the id is unknown.
    pub fn update_by_id(&self, id: &str, patch: &StatusPatch) -> Result<bool> {
        let mut inner = self.lock();
        let Some(record) = inner.table.get_mut(id) else {
            return Ok(false);
        };
        if patch.apply(record) {
            Self::flush(&inner)?;
        }
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.lock().table.get(id).cloned()
    }

    pub fn search<P>(&self, predicate: P) -> Vec<ExecutionRecord>
    where
        P: Fn(&ExecutionRecord) -> bool,
    {
        self.lock()
            .table
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.lock().table.values().cloned().collect()
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.table.clear();
        Self::flush(&inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(inner: &Inner) -> Result<()> {
        let content = serde_json::to_string_pretty(&inner.table)?;
        std::fs::write(&inner.path, content)?;
        Ok(())
    }
}
