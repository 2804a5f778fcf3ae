//! Keyed table: a [`RecordStore`] with a [`RamIndex`] overlay.
//!
//! Every public operation takes the instance lock, so a `Table` can be shared
//! between threads behind an `Arc`. After each mutation the table checks
//! `index.len() == store.live_count()`; a mismatch, a stale index entry or an
//! entry pointing at a slot with another key is logged, repaired and counted.
//! Once [`StoreConfig::max_repairs`] repairs have been made the table refuses
//! further repairs with [`StorageError::RepairLimit`].
use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    vec,
};

use log::{error, info};

use super::{
    StorageError, StoreConfig,
    import::{ImportReport, import_lines},
    index::{DoublesReport, RamIndex},
    registry::{Introspect, StoreKind, StoreStats},
    row::Row,
    schema::RowSchema,
    store::{Handle, RecordStore},
};

#[derive(Debug)]
pub struct Table {
    path: PathBuf,
    schema: RowSchema,
    inner: Mutex<TableInner>,
}

#[derive(Debug)]
struct TableInner {
    store: RecordStore,
    index: RamIndex,
    config: StoreConfig,
    repairs: usize,
}

impl Table {
    pub fn open(path: impl AsRef<Path>, schema: RowSchema) -> Result<Self, StorageError> {
        Self::open_with(path, schema, StoreConfig::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        schema: RowSchema,
        config: StoreConfig,
    ) -> Result<Self, StorageError> {
        let mut store = RecordStore::open_with(&path, &schema, 0, &config)?;
        let index = RamIndex::build(&mut store, config.index_growth)?;
        let mut inner = TableInner {
            store,
            index,
            config,
            repairs: 0,
        };
        inner.check_size()?;
        info!(
            "opened table {:?} with {} rows",
            inner.store.path(),
            inner.index.len()
        );

        Ok(Self {
            path: inner.store.path().to_path_buf(),
            schema,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Row>, StorageError> {
        let key = self.schema.encode_key(key)?;
        self.lock()?.get(&key)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        let key = self.schema.encode_key(key)?;
        Ok(self.lock()?.index.get(&key).is_some())
    }

    /// Inserts or replaces the row under its key; returns the replaced row.
    pub fn put(&self, row: Row) -> Result<Option<Row>, StorageError> {
        self.check_schema(&row)?;
        let mut inner = self.lock()?;
        let previous = inner.put(&row)?;
        inner.check_size()?;
        Ok(previous)
    }

    /// Writes many rows under one lock. Rows whose key already has a slot are
    /// rewritten in ascending slot order, new rows are appended in input order.
    pub fn put_all(&self, rows: Vec<Row>) -> Result<(), StorageError> {
        for row in rows.iter() {
            self.check_schema(row)?;
        }

        let mut inner = self.lock()?;
        let (mut updates, inserts): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .map(|row| (inner.index.get(row.key()), row))
            .partition(|(handle, _)| handle.is_some());
        updates.sort_by_key(|(handle, _)| *handle);

        for (_, row) in updates.into_iter().chain(inserts) {
            inner.put(&row)?;
        }
        inner.check_size()
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<Row>, StorageError> {
        let key = self.schema.encode_key(key)?;
        let mut inner = self.lock()?;
        let removed = inner.remove(&key)?;
        inner.check_size()?;
        Ok(removed)
    }

    /// Number of indexed rows.
    pub fn size(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.index.len())
    }

    /// Snapshot of all keys in key byte order, taken under the lock. Unlike
    /// [`Table::rows`] it does not hold the table while it is consumed.
    pub fn keys(&self, ascending: bool) -> Result<vec::IntoIter<Vec<u8>>, StorageError> {
        let inner = self.lock()?;
        let keys = inner
            .index
            .entries(ascending)
            .into_iter()
            .map(|(key, _)| key)
            .collect::<Vec<_>>();
        Ok(keys.into_iter())
    }

    /// Rows in key byte order, read from the store as the iterator advances. The
    /// table stays locked until the iterator is dropped.
    pub fn rows(&self, ascending: bool) -> Result<Rows<'_>, StorageError> {
        let inner = self.lock()?;
        let entries = inner.index.entries(ascending).into_iter();
        Ok(Rows { inner, entries })
    }

    /// Frees slots that repeat a key stored in another slot.
    pub fn remove_doubles(&self) -> Result<DoublesReport, StorageError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let report = inner.index.remove_doubles(&mut inner.store)?;
        inner.check_size()?;
        Ok(report)
    }

    /// Imports delimited text, one row per line. Malformed lines are reported
    /// and skipped.
    pub fn import<R: BufRead>(&self, reader: R, delimiter: char) -> Result<ImportReport, StorageError> {
        let mut inner = self.lock()?;
        let report = import_lines(reader, &self.schema, delimiter, |row| {
            inner.put(&row).map(|_| ())
        })?;
        inner.check_size()?;
        Ok(report)
    }

    /// Repairs made since the table was opened.
    pub fn repairs(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.repairs)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.lock()?.store.flush()
    }

    /// Flushes and releases the file; the index is dropped.
    pub fn close(self) -> Result<(), StorageError> {
        let inner = self.inner.into_inner().map_err(|_| StorageError::Poisoned)?;
        info!("closing table {:?}", self.path);
        inner.store.close()
    }

    fn lock(&self) -> Result<MutexGuard<'_, TableInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }

    fn check_schema(&self, row: &Row) -> Result<(), StorageError> {
        if row.schema() != &self.schema {
            return Err(StorageError::Row {
                action: "put".into(),
                error: format!("row schema does not match table {:?}", self.path),
            });
        }
        Ok(())
    }
}

impl Introspect for Table {
    fn stats(&self) -> Result<StoreStats, StorageError> {
        let inner = self.lock()?;
        Ok(StoreStats {
            path: self.path.clone(),
            kind: StoreKind::Table,
            slots: inner.store.slot_count(),
            live: inner.store.live_count(),
            free: inner.store.free_count(),
            slot_width: inner.store.slot_width(),
            index_entries: Some(inner.index.len()),
            repairs: inner.repairs,
        })
    }
}

impl TableInner {
    fn get(&mut self, key: &[u8]) -> Result<Option<Row>, StorageError> {
        let Some(handle) = self.index.get(key) else {
            return Ok(None);
        };
        if let Some(row) = self.read_row(handle, key)? {
            return Ok(Some(row));
        }

        match self.relocate(key, handle)? {
            Some(handle) => self.read_row(handle, key),
            None => Ok(None),
        }
    }

    fn put(&mut self, row: &Row) -> Result<Option<Row>, StorageError> {
        let key = row.key();
        let width = key.len();

        let Some(handle) = self.index.get(key) else {
            let handle = self.store.allocate(row.as_bytes())?;
            self.index.put(key.to_vec(), handle);
            return Ok(None);
        };

        match self.store.read_full(handle)? {
            Some(mut node) if node.key(width) == Some(key) => {
                let previous = node.replace_body(row.as_bytes().to_vec());
                self.store.commit(&mut node)?;
                previous
                    .map(|bytes| Row::from_bytes(self.store.schema(), bytes))
                    .transpose()
            }
            _ => {
                self.repair(&format!(
                    "index maps {} to slot {handle} which does not hold it",
                    String::from_utf8_lossy(key)
                ))?;
                self.index.remove(key);
                let handle = self.store.allocate(row.as_bytes())?;
                self.index.put(key.to_vec(), handle);
                Ok(None)
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Row>, StorageError> {
        let Some(handle) = self.index.get(key) else {
            return Ok(None);
        };

        let found = match self.read_row(handle, key)? {
            Some(row) => Some((handle, row)),
            None => match self.relocate(key, handle)? {
                Some(moved) => self.read_row(moved, key)?.map(|row| (moved, row)),
                None => None,
            },
        };
        let Some((handle, row)) = found else {
            return Ok(None);
        };

        self.store.free(handle)?;
        self.index.remove(key);
        Ok(Some(row))
    }

    /// Reads the row at `handle`, or `None` when the slot no longer holds `key`.
    fn read_row(&mut self, handle: Handle, key: &[u8]) -> Result<Option<Row>, StorageError> {
        match self.store.read_full(handle)? {
            Some(node) if node.key(key.len()) == Some(key) => match node.into_body() {
                Some(body) => Row::from_bytes(self.store.schema(), body).map(Some),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Handles an index entry whose slot does not hold its key: drops the entry
    /// and re-indexes the key under the slot that actually holds it, if any.
    fn relocate(&mut self, key: &[u8], stale: Handle) -> Result<Option<Handle>, StorageError> {
        self.repair(&format!(
            "index maps {} to slot {stale} which does not hold it",
            String::from_utf8_lossy(key)
        ))?;
        self.index.remove(key);

        let found = self
            .store
            .scan_keys()?
            .into_iter()
            .find(|(_, k)| k.as_slice() == key)
            .map(|(handle, _)| handle);
        if let Some(handle) = found {
            self.index.put(key.to_vec(), handle);
        }
        Ok(found)
    }

    /// Follows a stale entry met while iterating. The key is re-indexed where it
    /// actually lives, and the index is checked against the live count when the
    /// key is gone.
    fn relocate_row(&mut self, key: &[u8], stale: Handle) -> Result<Option<Row>, StorageError> {
        match self.relocate(key, stale)? {
            Some(moved) => self.read_row(moved, key),
            None => {
                self.check_size()?;
                Ok(None)
            }
        }
    }

    fn check_size(&mut self) -> Result<(), StorageError> {
        if self.index.len() as u64 == self.store.live_count() {
            return Ok(());
        }

        self.repair(&format!(
            "index holds {} keys but store has {} live slots",
            self.index.len(),
            self.store.live_count()
        ))?;
        self.index = RamIndex::build(&mut self.store, self.config.index_growth)?;
        if self.index.len() as u64 != self.store.live_count() {
            self.index.remove_doubles(&mut self.store)?;
        }

        if self.index.len() as u64 != self.store.live_count() {
            let reason = format!(
                "index holds {} keys for {} live slots after rebuild",
                self.index.len(),
                self.store.live_count()
            );
            error!("{:?}: {reason}", self.store.path());
            return Err(StorageError::Corrupted {
                path: self.store.path().to_path_buf(),
                reason,
            });
        }
        Ok(())
    }

    fn repair(&mut self, reason: &str) -> Result<(), StorageError> {
        let limit = self.config.max_repairs;
        if self.repairs >= limit {
            error!(
                "{:?}: {reason}; repair limit {limit} reached",
                self.store.path()
            );
            return Err(StorageError::RepairLimit { limit });
        }

        self.repairs += 1;
        error!(
            "{:?}: {reason}; repairing ({}/{limit})",
            self.store.path(),
            self.repairs
        );
        Ok(())
    }
}

/// Lazy row iterator returned by [`Table::rows`].
pub struct Rows<'a> {
    inner: MutexGuard<'a, TableInner>,
    entries: vec::IntoIter<(Vec<u8>, Handle)>,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, handle) = self.entries.next()?;
            match self.inner.read_row(handle, &key) {
                Ok(Some(row)) => return Some(Ok(row)),
                Ok(None) => match self.inner.relocate_row(&key, handle) {
                    Ok(Some(row)) => return Some(Ok(row)),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use tempdir::TempDir;

    use super::*;

    fn schema() -> RowSchema {
        RowSchema::new(vec![("key", 4), ("value", 8)]).unwrap()
    }

    fn open(temp: &TempDir) -> Table {
        let _ = env_logger::builder().is_test(true).try_init();
        Table::open(temp.path().join("table.db"), schema()).unwrap()
    }

    #[test]
    fn table_put_get() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let row = schema().row(&["aaaa", "11111111"]).unwrap();

        assert_eq!(table.put(row.clone()).unwrap(), None);
        assert_eq!(table.get(b"aaaa").unwrap(), Some(row));
        assert_eq!(table.get(b"zzzz").unwrap(), None);
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn table_short_key_is_padded() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let row = schema().row(&["ab", "1"]).unwrap();

        table.put(row.clone()).unwrap();
        assert_eq!(table.get(b"ab").unwrap(), Some(row));
        assert!(table.has(b"ab").unwrap());
        assert!(table.get(b"abcde").is_err());
    }

    #[test]
    fn table_put_replaces_in_place() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let first = schema().row(&["aaaa", "11111111"]).unwrap();
        let second = schema().row(&["aaaa", "22222222"]).unwrap();

        table.put(first.clone()).unwrap();
        assert_eq!(table.put(second.clone()).unwrap(), Some(first));
        assert_eq!(table.get(b"aaaa").unwrap(), Some(second));
        assert_eq!(table.size().unwrap(), 1);

        let stats = table.stats().unwrap();
        assert_eq!(stats.slots, 1);
    }

    #[test]
    fn table_remove() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let row = schema().row(&["aaaa", "11111111"]).unwrap();
        table.put(row.clone()).unwrap();
        table.put(schema().row(&["bbbb", "2"]).unwrap()).unwrap();

        assert_eq!(table.remove(b"aaaa").unwrap(), Some(row));
        assert_eq!(table.get(b"aaaa").unwrap(), None);
        assert_eq!(table.remove(b"aaaa").unwrap(), None);
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn table_reuses_freed_slot() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["aaaa", "1"]).unwrap()).unwrap();
        table.put(schema().row(&["bbbb", "2"]).unwrap()).unwrap();
        table.remove(b"aaaa").unwrap();
        table.put(schema().row(&["cccc", "3"]).unwrap()).unwrap();

        let stats = table.stats().unwrap();
        assert_eq!(stats.slots, 2);
        assert_eq!(stats.live, 2);
        assert_eq!(stats.free, 0);
    }

    #[test]
    fn table_persistence() {
        let temp = TempDir::new("table").unwrap();
        let row = schema().row(&["aaaa", "11111111"]).unwrap();

        let table = open(&temp);
        table.put(row.clone()).unwrap();
        table.put(schema().row(&["bbbb", "2"]).unwrap()).unwrap();
        table.remove(b"bbbb").unwrap();
        table.close().unwrap();

        let table = open(&temp);
        assert_eq!(table.get(b"aaaa").unwrap(), Some(row));
        assert_eq!(table.get(b"bbbb").unwrap(), None);
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn table_keys_and_rows_ordered() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        for key in ["cccc", "aaaa", "bbbb"] {
            table.put(schema().row(&[key, key]).unwrap()).unwrap();
        }

        let keys = table.keys(true).unwrap().collect::<Vec<_>>();
        assert_eq!(keys, vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()]);

        let rows = table
            .rows(false)
            .unwrap()
            .map(|r| r.unwrap().to_text(','))
            .collect::<Vec<_>>();
        assert_eq!(rows, vec!["cccc,cccc", "bbbb,bbbb", "aaaa,aaaa"]);
    }

    #[test]
    fn table_put_all() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["bbbb", "1"]).unwrap()).unwrap();

        table
            .put_all(vec![
                schema().row(&["aaaa", "2"]).unwrap(),
                schema().row(&["bbbb", "3"]).unwrap(),
                schema().row(&["aaaa", "4"]).unwrap(),
            ])
            .unwrap();

        assert_eq!(table.size().unwrap(), 2);
        assert_eq!(table.get(b"aaaa").unwrap().unwrap().column_trimmed(1), b"4");
        assert_eq!(table.get(b"bbbb").unwrap().unwrap().column_trimmed(1), b"3");
    }

    #[test]
    fn table_rejects_foreign_schema() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let other = RowSchema::new(vec![("key", 4), ("value", 4), ("extra", 4)]).unwrap();

        assert!(table.put(other.row(&["aaaa", "1", "2"]).unwrap()).is_err());
    }

    #[test]
    fn table_remove_doubles() {
        let temp = TempDir::new("table").unwrap();
        let path = temp.path().join("table.db");

        let mut store = RecordStore::open(&path, &schema(), 0).unwrap();
        store.allocate(b"aaaa11111111").unwrap();
        store.allocate(b"aaaa22222222").unwrap();
        store.allocate(b"bbbb33333333").unwrap();
        store.close().unwrap();

        let table = Table::open(&path, schema()).unwrap();
        let stats = table.stats().unwrap();
        assert_eq!(table.size().unwrap(), stats.live as usize);
        assert_eq!(stats.live, 2);
        assert_eq!(stats.free, 1);
        assert_eq!(table.repairs().unwrap(), 1);
        assert_eq!(
            table.get(b"aaaa").unwrap().unwrap().column(1),
            b"11111111"
        );

        let report = table.remove_doubles().unwrap();
        assert_eq!(report.keys, 0);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn table_remove_doubles_after_open() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["aaaa", "11111111"]).unwrap()).unwrap();
        table.put(schema().row(&["bbbb", "22222222"]).unwrap()).unwrap();
        {
            let mut inner = table.lock().unwrap();
            inner.store.allocate(b"aaaa33333333").unwrap();
        }

        let report = table.remove_doubles().unwrap();
        assert_eq!(report.keys, 1);
        assert_eq!(report.removed, vec![Handle::new(2)]);
        assert_eq!(table.stats().unwrap().live, 2);
        assert_eq!(table.size().unwrap(), 2);
    }

    #[test]
    fn table_heals_stale_entry() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let row = schema().row(&["aaaa", "11111111"]).unwrap();
        table.put(row.clone()).unwrap();

        {
            // Move the row behind the index's back.
            let mut inner = table.lock().unwrap();
            let moved = inner.store.allocate(row.as_bytes()).unwrap();
            inner.store.free(Handle::new(0)).unwrap();
            assert_eq!(moved, Handle::new(1));
        }

        assert_eq!(table.get(b"aaaa").unwrap(), Some(row));
        assert_eq!(table.repairs().unwrap(), 1);
        assert_eq!(table.lock().unwrap().index.get(b"aaaa"), Some(Handle::new(1)));
    }

    #[test]
    fn table_put_heals_empty_slot() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["aaaa", "1"]).unwrap()).unwrap();
        table.lock().unwrap().store.free(Handle::new(0)).unwrap();

        let row = schema().row(&["aaaa", "2"]).unwrap();
        assert_eq!(table.put(row.clone()).unwrap(), None);
        assert_eq!(table.get(b"aaaa").unwrap(), Some(row));
        assert_eq!(table.size().unwrap(), 1);
        assert_eq!(table.repairs().unwrap(), 1);
    }

    #[test]
    fn table_size_mismatch_rebuilds_index() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["aaaa", "1"]).unwrap()).unwrap();
        table.lock().unwrap().index.clear();

        table.put(schema().row(&["bbbb", "2"]).unwrap()).unwrap();
        assert_eq!(table.size().unwrap(), 2);
        assert!(table.has(b"aaaa").unwrap());
        assert_eq!(table.repairs().unwrap(), 1);
    }

    #[test]
    fn table_repair_limit() {
        let temp = TempDir::new("table").unwrap();
        let config = StoreConfig {
            max_repairs: 1,
            ..StoreConfig::default()
        };
        let table = Table::open_with(temp.path().join("table.db"), schema(), config).unwrap();
        table.put(schema().row(&["aaaa", "1"]).unwrap()).unwrap();

        table.lock().unwrap().index.clear();
        table.put(schema().row(&["bbbb", "2"]).unwrap()).unwrap();

        table.lock().unwrap().index.clear();
        let err = table.put(schema().row(&["cccc", "3"]).unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::RepairLimit { limit: 1 }));
    }

    #[test]
    fn table_rows_skip_empty_slot() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["aaaa", "1"]).unwrap()).unwrap();
        table.put(schema().row(&["bbbb", "2"]).unwrap()).unwrap();
        {
            let mut inner = table.lock().unwrap();
            inner.store.free(Handle::new(0)).unwrap();
        }

        let rows = table
            .rows(true)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key(), b"bbbb");
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn table_rows_follow_moved_row() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let row = schema().row(&["aaaa", "11111111"]).unwrap();
        table.put(row.clone()).unwrap();
        {
            let mut inner = table.lock().unwrap();
            inner.store.allocate(row.as_bytes()).unwrap();
            inner.store.free(Handle::new(0)).unwrap();
        }

        let rows = table
            .rows(true)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows, vec![row]);
        assert_eq!(table.repairs().unwrap(), 1);
        assert_eq!(table.lock().unwrap().index.get(b"aaaa"), Some(Handle::new(1)));
    }

    #[test]
    fn table_rows_resync_size_with_foreign_key() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        table.put(schema().row(&["aaaa", "1"]).unwrap()).unwrap();
        {
            // Slot 0 now holds a key the index has never seen.
            let mut inner = table.lock().unwrap();
            let mut node = inner.store.read_full(Handle::new(0)).unwrap().unwrap();
            node.replace_body(b"cccc33333333".to_vec());
            inner.store.commit(&mut node).unwrap();
        }

        let rows = table
            .rows(true)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(table.size().unwrap(), table.stats().unwrap().live as usize);
        assert!(table.has(b"cccc").unwrap());
        assert!(!table.has(b"aaaa").unwrap());
    }

    #[test]
    fn table_remove_relocated_row() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);
        let row = schema().row(&["aaaa", "11111111"]).unwrap();
        table.put(row.clone()).unwrap();
        {
            let mut inner = table.lock().unwrap();
            inner.store.allocate(row.as_bytes()).unwrap();
            inner.store.free(Handle::new(0)).unwrap();
        }

        assert_eq!(table.remove(b"aaaa").unwrap(), Some(row));
        let stats = table.stats().unwrap();
        assert_eq!(stats.live, 0);
        assert_eq!(table.size().unwrap(), 0);
        assert_eq!(table.lock().unwrap().index.get(b"aaaa"), None);
    }

    #[test]
    fn table_import() {
        let temp = TempDir::new("table").unwrap();
        let table = open(&temp);

        let report = table
            .import("aaaa\t1\nbroken\nbbbb\t2\naaaa\t3\n".as_bytes(), '\t')
            .unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(table.size().unwrap(), 2);
        assert_eq!(table.get(b"aaaa").unwrap().unwrap().column_trimmed(1), b"3");
    }

    #[test]
    fn table_concurrent_writes() {
        let temp = TempDir::new("table").unwrap();
        let table = Arc::new(open(&temp));

        let handles = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..25 {
                        let key = format!("{t}{i:03}");
                        let row = table.schema().row(&[key.as_str(), "v"]).unwrap();
                        table.put(row).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.size().unwrap(), 200);
        assert_eq!(table.repairs().unwrap(), 0);
        assert!(table.has(b"7024").unwrap());
    }
}
