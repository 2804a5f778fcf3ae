//! RAM index from primary key to slot handle.
//!
//! The index is never persisted. [`RamIndex::build`] rebuilds it from the key
//! columns of a [`RecordStore`] each time a table is opened.
use std::collections::HashMap;

use log::{debug, error, info};

use super::{
    StorageError,
    store::{Handle, RecordStore},
};

#[derive(Debug, Default)]
pub struct RamIndex {
    map: HashMap<Vec<u8>, Handle>,
}

/// Outcome of [`RamIndex::remove_doubles`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DoublesReport {
    /// Keys that were found in more than one slot.
    pub keys: usize,
    /// Slots that were freed, in the order they were freed.
    pub removed: Vec<Handle>,
}

impl RamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans the key column of every live slot. Capacity is `growth` times the
    /// live count so the first inserts after opening do not rehash.
    ///
    /// When a key occurs in several slots the lowest slot wins; the others stay
    /// in the store until [`RamIndex::remove_doubles`] runs.
    pub fn build(store: &mut RecordStore, growth: f64) -> Result<Self, StorageError> {
        let keys = store.scan_keys()?;
        let capacity = (keys.len() as f64 * growth.max(1.0)) as usize;
        let mut map = HashMap::with_capacity(capacity);

        let mut doubles = 0;
        for (handle, key) in keys {
            if map.contains_key(&key) {
                doubles += 1;
                continue;
            }
            map.insert(key, handle);
        }

        if doubles > 0 {
            error!(
                "{:?}: {doubles} slots repeat a key already indexed",
                store.path()
            );
        }
        debug!("indexed {} keys of {:?}", map.len(), store.path());

        Ok(Self { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<Handle> {
        self.map.get(key).copied()
    }

    /// Inserts or replaces; returns the handle previously stored for `key`.
    pub fn put(&mut self, key: Vec<u8>, handle: Handle) -> Option<Handle> {
        self.map.insert(key, handle)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Handle> {
        self.map.remove(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Snapshot of all entries ordered by key bytes.
    pub fn entries(&self, ascending: bool) -> Vec<(Vec<u8>, Handle)> {
        let mut out = self
            .map
            .iter()
            .map(|(k, h)| (k.clone(), *h))
            .collect::<Vec<_>>();
        if ascending {
            out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        } else {
            out.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        }
        out
    }

    /// Frees every slot that repeats a key held by another slot.
    ///
    /// For each repeated key the slot the index already points at survives, or
    /// the lowest slot when the index points elsewhere. Victims are freed in
    /// descending slot order.
    pub fn remove_doubles(&mut self, store: &mut RecordStore) -> Result<DoublesReport, StorageError> {
        let mut groups: HashMap<Vec<u8>, Vec<Handle>> = HashMap::new();
        for (handle, key) in store.scan_keys()? {
            groups.entry(key).or_default().push(handle);
        }

        let mut report = DoublesReport::default();
        let mut victims = Vec::new();
        for (key, handles) in groups {
            if handles.len() < 2 {
                continue;
            }

            let keep = match self.get(&key) {
                Some(h) if handles.contains(&h) => h,
                _ => handles[0],
            };
            victims.extend(handles.into_iter().filter(|h| *h != keep));
            self.put(key, keep);
            report.keys += 1;
        }

        victims.sort_unstable_by(|a, b| b.cmp(a));
        for handle in victims {
            store.free(handle)?;
            report.removed.push(handle);
        }

        if report.keys > 0 {
            info!(
                "{:?}: removed {} slots repeating {} keys",
                store.path(),
                report.removed.len(),
                report.keys
            );
        }
        Ok(report)
    }
}
