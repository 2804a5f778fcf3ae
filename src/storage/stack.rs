//! Persistent double-ended stack.
//!
//! Every live slot of the underlying [`RecordStore`] is a link in one chain. The
//! slot overhead carries two handles, `left` (towards the root) and `right`
//! (towards the tail); the file header keeps the root and tail handles.
//!
//! ```text
//! root                                tail
//!  [a] <-> [b] <-> [c] <-> ... <-> [z]
//! ```
//!
//! [`Stack::push`] appends at the tail. Rows leave from the tail with
//! [`Stack::pop`] (LIFO) or from the root with [`Stack::pot`] (FIFO), so the
//! structure is really a deque; the role names [`Stack::remove_from_tail`] and
//! [`Stack::remove_from_head`] say the same thing without the pun.
use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::{debug, error, info};

use super::{
    StorageError, StoreConfig,
    header::stack::{LEFT, OVERHEAD_SIZE, RIGHT, ROOT_HANDLE, TAIL_HANDLE},
    import::{ImportReport, import_lines},
    registry::{Introspect, StoreKind, StoreStats},
    row::Row,
    schema::RowSchema,
    store::{Handle, Node, RecordStore},
};

/// Walking order of a [`StackIter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Root to tail, oldest first.
    Forward,
    /// Tail to root, newest first.
    Backward,
}

impl Direction {
    fn link(self) -> usize {
        match self {
            Direction::Forward => RIGHT,
            Direction::Backward => LEFT,
        }
    }
}

#[derive(Debug)]
pub struct Stack {
    path: PathBuf,
    schema: RowSchema,
    inner: Mutex<StackInner>,
}

#[derive(Debug)]
struct StackInner {
    store: RecordStore,
}

impl Stack {
    pub fn open(path: impl AsRef<Path>, schema: RowSchema) -> Result<Self, StorageError> {
        Self::open_with(path, schema, StoreConfig::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        schema: RowSchema,
        config: StoreConfig,
    ) -> Result<Self, StorageError> {
        let store = RecordStore::open_with(&path, &schema, OVERHEAD_SIZE, &config)?;
        let inner = StackInner { store };

        let (root, tail) = (inner.root(), inner.tail());
        let live = inner.store.live_count();
        if root.is_none() != tail.is_none() || root.is_none() != (live == 0) {
            return Err(inner.corrupted(format!(
                "root {root:?} and tail {tail:?} disagree with {live} live slots"
            )));
        }
        info!("opened stack {:?} with {live} rows", inner.store.path());

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

    /// Appends `row` at the tail.
    pub fn push(&self, row: Row) -> Result<Handle, StorageError> {
        self.check_schema(&row)?;
        self.lock()?.push(&row)
    }

    /// Removes and returns the tail row.
    pub fn remove_from_tail(&self) -> Result<Option<Row>, StorageError> {
        let mut inner = self.lock()?;
        match inner.tail() {
            Some(tail) => inner.remove(tail).map(Some),
            None => Ok(None),
        }
    }

    /// Removes and returns the root row.
    pub fn remove_from_head(&self) -> Result<Option<Row>, StorageError> {
        let mut inner = self.lock()?;
        match inner.root() {
            Some(root) => inner.remove(root).map(Some),
            None => Ok(None),
        }
    }

    pub fn peek_tail(&self) -> Result<Option<Row>, StorageError> {
        let mut inner = self.lock()?;
        match inner.tail() {
            Some(tail) => inner.row(tail).map(Some),
            None => Ok(None),
        }
    }

    pub fn peek_head(&self) -> Result<Option<Row>, StorageError> {
        let mut inner = self.lock()?;
        match inner.root() {
            Some(root) => inner.row(root).map(Some),
            None => Ok(None),
        }
    }

    /// Same as [`Stack::remove_from_tail`].
    pub fn pop(&self) -> Result<Option<Row>, StorageError> {
        self.remove_from_tail()
    }

    /// Same as [`Stack::remove_from_head`].
    pub fn pot(&self) -> Result<Option<Row>, StorageError> {
        self.remove_from_head()
    }

    /// Same as [`Stack::peek_tail`].
    pub fn top(&self) -> Result<Option<Row>, StorageError> {
        self.peek_tail()
    }

    /// Same as [`Stack::peek_head`].
    pub fn bot(&self) -> Result<Option<Row>, StorageError> {
        self.peek_head()
    }

    pub fn size(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.store.live_count() as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.lock()?.root().is_none())
    }

    /// Walks the chain. The stack stays locked until the iterator is dropped.
    pub fn iter(&self, direction: Direction) -> Result<StackIter<'_>, StorageError> {
        let inner = self.lock()?;
        let next = match direction {
            Direction::Forward => inner.root(),
            Direction::Backward => inner.tail(),
        };
        Ok(StackIter {
            inner,
            direction,
            next,
            last: None,
        })
    }

    /// Pushes one row per parsed line of `reader`. Malformed lines are reported
    /// and skipped.
    pub fn import<R: BufRead>(&self, reader: R, delimiter: char) -> Result<ImportReport, StorageError> {
        let mut inner = self.lock()?;
        import_lines(reader, &self.schema, delimiter, |row| {
            inner.push(&row).map(|_| ())
        })
    }

    /// Writes all rows, root first, in the import format. Returns the row count.
    pub fn export<W: Write>(&self, mut writer: W, delimiter: char) -> Result<usize, StorageError> {
        let mut count = 0;
        for row in self.iter(Direction::Forward)? {
            writeln!(writer, "{}", row?.to_text(delimiter))?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    }

    /// Walks the chain from the root and checks every link against its neighbour,
    /// the tail handle and the live count.
    pub fn verify(&self) -> Result<(), StorageError> {
        self.lock()?.verify()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.lock()?.store.flush()
    }

    pub fn close(self) -> Result<(), StorageError> {
        let inner = self.inner.into_inner().map_err(|_| StorageError::Poisoned)?;
        info!("closing stack {:?}", self.path);
        inner.store.close()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StackInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }

    fn check_schema(&self, row: &Row) -> Result<(), StorageError> {
        if row.schema() != &self.schema {
            return Err(StorageError::Row {
                action: "push".into(),
                error: format!("row schema does not match stack {:?}", self.path),
            });
        }
        Ok(())
    }
}

impl Introspect for Stack {
    fn stats(&self) -> Result<StoreStats, StorageError> {
        let inner = self.lock()?;
        Ok(StoreStats {
            path: self.path.clone(),
            kind: StoreKind::Stack,
            slots: inner.store.slot_count(),
            live: inner.store.live_count(),
            free: inner.store.free_count(),
            slot_width: inner.store.slot_width(),
            index_entries: None,
            repairs: 0,
        })
    }
}

impl StackInner {
    fn root(&self) -> Option<Handle> {
        self.store.header_handle(ROOT_HANDLE)
    }

    fn tail(&self) -> Option<Handle> {
        self.store.header_handle(TAIL_HANDLE)
    }

    fn push(&mut self, row: &Row) -> Result<Handle, StorageError> {
        let tail = self.tail();
        let mut overhead = [0; OVERHEAD_SIZE];
        overhead[LEFT..RIGHT].clone_from_slice(&Handle::encode(tail));
        overhead[RIGHT..].clone_from_slice(&Handle::encode(None));

        let handle = self.store.allocate_with(&overhead, row.as_bytes())?;
        match tail {
            Some(tail) => {
                let mut node = self.node(tail)?;
                node.set_handle_at(RIGHT, Some(handle));
                self.store.commit(&mut node)?;
            }
            None => self.store.set_header_handle(ROOT_HANDLE, Some(handle))?,
        }
        self.store.set_header_handle(TAIL_HANDLE, Some(handle))?;

        debug!("pushed {} into slot {handle}", row);
        Ok(handle)
    }

    /// Unlinks the node at `handle`, frees its slot and returns its row.
    fn remove(&mut self, handle: Handle) -> Result<Row, StorageError> {
        let mut node = self.node(handle)?;
        self.store.load_body(&mut node)?;
        self.unlink(&node)?;
        self.store.free(handle)?;

        let body = node.into_body().unwrap_or_default();
        Row::from_bytes(self.store.schema(), body)
    }

    /// Splices `node` out of the chain, moving root or tail when it sits at an end.
    fn unlink(&mut self, node: &Node) -> Result<(), StorageError> {
        let left = node.handle_at(LEFT);
        let right = node.handle_at(RIGHT);

        match left {
            Some(left) => {
                let mut prev = self.node(left)?;
                prev.set_handle_at(RIGHT, right);
                self.store.commit(&mut prev)?;
            }
            None => self.store.set_header_handle(ROOT_HANDLE, right)?,
        }
        match right {
            Some(right) => {
                let mut next = self.node(right)?;
                next.set_handle_at(LEFT, left);
                self.store.commit(&mut next)?;
            }
            None => self.store.set_header_handle(TAIL_HANDLE, left)?,
        }
        Ok(())
    }

    fn row(&mut self, handle: Handle) -> Result<Row, StorageError> {
        let mut node = self.node(handle)?;
        self.store.load_body(&mut node)?;
        let body = node.into_body().unwrap_or_default();
        Row::from_bytes(self.store.schema(), body)
    }

    /// A chain member; a free slot here means the chain is broken.
    fn node(&mut self, handle: Handle) -> Result<Node, StorageError> {
        match self.store.read(handle)? {
            Some(node) => Ok(node),
            None => Err(self.corrupted(format!("chain links to free slot {handle}"))),
        }
    }

    fn verify(&mut self) -> Result<(), StorageError> {
        let live = self.store.live_count();
        let mut prev: Option<Handle> = None;
        let mut next = self.root();
        let mut count = 0_u64;

        while let Some(handle) = next {
            count += 1;
            if count > live {
                return Err(self.corrupted(format!(
                    "chain is longer than {live} live slots"
                )));
            }

            let node = self.node(handle)?;
            if node.handle_at(LEFT) != prev {
                return Err(self.corrupted(format!(
                    "slot {handle} links left to {:?}, expected {prev:?}",
                    node.handle_at(LEFT)
                )));
            }
            prev = Some(handle);
            next = node.handle_at(RIGHT);
        }

        if prev != self.tail() || count != live {
            return Err(self.corrupted(format!(
                "chain ends at {prev:?} after {count} links, tail is {:?} with {live} live slots",
                self.tail()
            )));
        }
        Ok(())
    }

    fn corrupted(&self, reason: String) -> StorageError {
        error!("{:?} is corrupted: {reason}", self.store.path());
        StorageError::Corrupted {
            path: self.store.path().to_path_buf(),
            reason,
        }
    }
}

/// Chain walk returned by [`Stack::iter`].
///
/// [`StackIter::remove`] deletes the row yielded last without disturbing the walk.
pub struct StackIter<'a> {
    inner: MutexGuard<'a, StackInner>,
    direction: Direction,
    next: Option<Handle>,
    last: Option<Handle>,
}

impl StackIter<'_> {
    /// Removes the row most recently returned by `next`. Returns `None` when
    /// nothing has been yielded yet or it was already removed.
    pub fn remove(&mut self) -> Result<Option<Row>, StorageError> {
        match self.last.take() {
            Some(handle) => self.inner.remove(handle).map(Some),
            None => Ok(None),
        }
    }
}

impl Iterator for StackIter<'_> {
    type Item = Result<Row, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.next.take()?;
        let node = match self.inner.store.read_full(handle) {
            Ok(Some(node)) => node,
            Ok(None) => {
                return Some(Err(self
                    .inner
                    .corrupted(format!("chain links to free slot {handle}"))));
            }
            Err(e) => return Some(Err(e)),
        };

        self.next = node.handle_at(self.direction.link());
        self.last = Some(handle);
        let body = node.into_body().unwrap_or_default();
        Some(Row::from_bytes(self.inner.store.schema(), body))
    }
}
