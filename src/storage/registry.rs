//! Introspection over open tables and stacks.
//!
//! There is no process-wide list of open files. A component that wants
//! cross-table statistics owns a [`Registry`] and registers the instances it
//! cares about; the registry only keeps weak references.
use std::{
    path::PathBuf,
    sync::{Arc, Mutex, Weak},
};

use super::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Table,
    Stack,
}

/// Point-in-time figures for one open instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub path: PathBuf,
    pub kind: StoreKind,
    pub slots: u64,
    pub live: u64,
    pub free: usize,
    pub slot_width: usize,
    /// `None` for instances without a key index.
    pub index_entries: Option<usize>,
    pub repairs: usize,
}

pub trait Introspect: Send + Sync {
    fn stats(&self) -> Result<StoreStats, StorageError>;
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<Vec<Weak<dyn Introspect>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Introspect + 'static>(&self, instance: &Arc<T>) -> Result<(), StorageError> {
        let weak = Arc::downgrade(instance) as Weak<dyn Introspect>;
        self.entries
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .push(weak);
        Ok(())
    }

    /// Stats of every registered instance that is still alive. Dropped
    /// instances are forgotten.
    pub fn stats(&self) -> Result<Vec<StoreStats>, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.retain(|weak| weak.strong_count() > 0);

        entries
            .iter()
            .filter_map(Weak::upgrade)
            .map(|instance| instance.stats())
            .collect()
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.retain(|weak| weak.strong_count() > 0);
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
