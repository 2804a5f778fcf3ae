//! Fixed-width slot file.
//!
//! The [`RecordStore`] maps a [`Handle`] to one fixed-size region of a backing file
//! and owns allocation of those regions. Overlays never deal with byte offsets;
//! they read a slot into a transient [`Node`], change it, and hand it back to
//! [`RecordStore::commit`].
//!
//! # Layout
//!
//! ```text
//! [ header: HEADER_SIZE ][ slot 0 ][ slot 1 ] ...
//! slot = [ status: 1 ][ overhead: O ][ body: B ]
//! ```
//!
//! The header is bincode encoded (big endian, fixed-width integers) and records
//! `O`, `B` and a handful of store-level handles the overlays may use. The status
//! byte marks a slot live, deleted or never written, so any key bytes are legal.
//!
//! # Design Notes
//!
//! - Writes go straight to the file; there is no page cache. `commit` writes the
//!   dirty parts of a node with a single `write_all`.
//! - The free list is not persisted. Opening a store scans the status bytes and
//!   rebuilds it together with the live count.
//! - Handles beyond the slot count are programming or corruption errors and panic.
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_into_slice,
};
use log::{debug, error, info, trace};

use super::{
    StorageError, StoreConfig,
    header::{
        file::{HEADER_HANDLES, HEADER_SIZE, MAGIC, VERSION},
        slot::{HANDLE_SIZE, NULL_HANDLE, STATUS_DELETED, STATUS_EMPTY, STATUS_LIVE, STATUS_SIZE},
    },
    schema::RowSchema,
};

/// Address of a slot in a [`RecordStore`]. "No record" is `Option::<Handle>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(self) -> u64 {
        self.0
    }

    pub(crate) fn encode(handle: Option<Handle>) -> [u8; HANDLE_SIZE] {
        handle.map_or(NULL_HANDLE, |h| h.0).to_be_bytes()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Option<Handle> {
        let mut buf = [0; HANDLE_SIZE];
        buf.clone_from_slice(&bytes[..HANDLE_SIZE]);
        match u64::from_be_bytes(buf) {
            NULL_HANDLE => None,
            index => Some(Handle(index)),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// In-memory view of one live slot.
///
/// Overhead is always loaded; the body only on demand. Setters mark the part they
/// touch dirty and [`RecordStore::commit`] writes back only dirty parts.
#[derive(Debug, Clone)]
pub struct Node {
    handle: Handle,
    overhead: Vec<u8>,
    body: Option<Vec<u8>>,
    overhead_dirty: bool,
    body_dirty: bool,
}

impl Node {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn overhead(&self) -> &[u8] {
        &self.overhead
    }

    pub fn set_overhead(&mut self, overhead: &[u8]) {
        self.overhead.clear();
        self.overhead.extend_from_slice(overhead);
        self.overhead_dirty = true;
    }

    /// Reads a handle field stored at `offset` inside the overhead.
    pub fn handle_at(&self, offset: usize) -> Option<Handle> {
        Handle::decode(&self.overhead[offset..offset + HANDLE_SIZE])
    }

    pub fn set_handle_at(&mut self, offset: usize, handle: Option<Handle>) {
        self.overhead[offset..offset + HANDLE_SIZE].clone_from_slice(&Handle::encode(handle));
        self.overhead_dirty = true;
    }

    /// `None` until the body has been loaded.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Replaces the body, returning the previously loaded one.
    pub fn replace_body(&mut self, body: Vec<u8>) -> Option<Vec<u8>> {
        self.body_dirty = true;
        self.body.replace(body)
    }

    pub fn into_body(self) -> Option<Vec<u8>> {
        self.body
    }

    /// The first `width` body bytes, if the body is loaded.
    pub fn key(&self, width: usize) -> Option<&[u8]> {
        self.body.as_deref().map(|body| &body[..width])
    }

    pub fn is_dirty(&self) -> bool {
        self.overhead_dirty || self.body_dirty
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct FileHeader {
    magic: [u8; 8],
    version: u32,
    overhead: u32,
    body: u32,
    handles: [u64; HEADER_HANDLES],
}

#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    file: File,
    header: FileHeader,
    schema: RowSchema,
    overhead: usize,
    slots: u64,
    live: u64,
    free: Vec<u64>,
    sync_on_commit: bool,
}

impl RecordStore {
    /// Opens the slot file at `path`, creating an empty one when missing.
    pub fn open(
        path: impl AsRef<Path>,
        schema: &RowSchema,
        overhead: usize,
    ) -> Result<Self, StorageError> {
        Self::open_with(path, schema, overhead, &StoreConfig::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        schema: &RowSchema,
        overhead: usize,
        config: &StoreConfig,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        let mut store = Self {
            header: FileHeader {
                magic: MAGIC,
                version: VERSION,
                overhead: width_u32(overhead, &path)?,
                body: width_u32(schema.object_size(), &path)?,
                handles: [NULL_HANDLE; HEADER_HANDLES],
            },
            path,
            file,
            schema: schema.clone(),
            overhead,
            slots: 0,
            live: 0,
            free: Vec::new(),
            sync_on_commit: config.sync_on_commit,
        };

        if len == 0 {
            store.write_header()?;
            info!("created slot file {:?}", store.path);
        } else {
            store.read_header(len)?;
            store.scan_status()?;
            info!(
                "opened slot file {:?}: {} slots, {} live",
                store.path, store.slots, store.live
            );
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn overhead_width(&self) -> usize {
        self.overhead
    }

    pub fn body_width(&self) -> usize {
        self.schema.object_size()
    }

    /// Bytes occupied by one slot, status byte included.
    pub fn slot_width(&self) -> usize {
        STATUS_SIZE + self.overhead + self.body_width()
    }

    pub fn slot_count(&self) -> u64 {
        self.slots
    }

    pub fn live_count(&self) -> u64 {
        self.live
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Allocates a slot holding `body` with zeroed overhead.
    pub fn allocate(&mut self, body: &[u8]) -> Result<Handle, StorageError> {
        let overhead = vec![0; self.overhead];
        self.allocate_with(&overhead, body)
    }

    /// Allocates a slot, reusing the most recently freed one before growing the file.
    pub fn allocate_with(&mut self, overhead: &[u8], body: &[u8]) -> Result<Handle, StorageError> {
        self.check_widths(overhead, body)?;

        let mut buf = Vec::with_capacity(self.slot_width());
        buf.push(STATUS_LIVE);
        buf.extend_from_slice(overhead);
        buf.extend_from_slice(body);

        let (index, reused) = match self.free.pop() {
            Some(index) => (index, true),
            None => (self.slots, false),
        };

        if let Err(e) = self.write_bytes(self.offset(index), &buf) {
            if reused {
                self.free.push(index);
            }
            return Err(e);
        }

        if !reused {
            self.slots += 1;
        }
        self.live += 1;
        trace!("allocated slot {index} (reused: {reused})");

        Ok(Handle(index))
    }

    /// Reads the overhead of a slot. Returns `None` for free slots.
    ///
    /// # Panics
    ///
    /// If `handle` is beyond the slot count.
    pub fn read(&mut self, handle: Handle) -> Result<Option<Node>, StorageError> {
        self.check_bounds(handle);

        let mut buf = vec![0; STATUS_SIZE + self.overhead];
        self.read_bytes(self.offset(handle.0), &mut buf)?;
        if !self.live_status(handle, buf[0])? {
            return Ok(None);
        }

        Ok(Some(Node {
            handle,
            overhead: buf.split_off(STATUS_SIZE),
            body: None,
            overhead_dirty: false,
            body_dirty: false,
        }))
    }

    /// Reads overhead and body of a slot in one I/O.
    pub fn read_full(&mut self, handle: Handle) -> Result<Option<Node>, StorageError> {
        self.check_bounds(handle);

        let mut buf = vec![0; self.slot_width()];
        self.read_bytes(self.offset(handle.0), &mut buf)?;
        if !self.live_status(handle, buf[0])? {
            return Ok(None);
        }

        let body = buf.split_off(STATUS_SIZE + self.overhead);
        Ok(Some(Node {
            handle,
            overhead: buf.split_off(STATUS_SIZE),
            body: Some(body),
            overhead_dirty: false,
            body_dirty: false,
        }))
    }

    /// Loads the body of `node` unless it is already present.
    pub fn load_body(&mut self, node: &mut Node) -> Result<(), StorageError> {
        if node.body.is_some() {
            return Ok(());
        }
        self.check_bounds(node.handle);

        let mut body = vec![0; self.body_width()];
        self.read_bytes(
            self.offset(node.handle.0) + self.body_offset() as u64,
            &mut body,
        )?;
        node.body = Some(body);
        Ok(())
    }

    /// Reads only the key column of a slot. Returns `None` for free slots.
    pub fn read_key(&mut self, handle: Handle) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_bounds(handle);

        let mut buf = vec![0; self.body_offset() + self.schema.key_width()];
        self.read_bytes(self.offset(handle.0), &mut buf)?;
        if !self.live_status(handle, buf[0])? {
            return Ok(None);
        }
        Ok(Some(buf.split_off(self.body_offset())))
    }

    /// Writes the dirty parts of `node` back to its slot.
    pub fn commit(&mut self, node: &mut Node) -> Result<(), StorageError> {
        if !node.is_dirty() {
            return Ok(());
        }
        self.check_bounds(node.handle);

        let body = node.body.as_deref().unwrap_or_default();
        if node.body_dirty {
            self.check_widths(&node.overhead, body)?;
        } else if node.overhead.len() != self.overhead {
            self.check_widths(&node.overhead, &[])?;
        }

        let start = self.offset(node.handle.0) + STATUS_SIZE as u64;
        match (node.overhead_dirty, node.body_dirty) {
            (true, true) => {
                let mut buf = Vec::with_capacity(self.overhead + body.len());
                buf.extend_from_slice(&node.overhead);
                buf.extend_from_slice(body);
                self.write_bytes(start, &buf)?;
            }
            (true, false) => self.write_bytes(start, &node.overhead)?,
            (false, true) => self.write_bytes(start + self.overhead as u64, body)?,
            (false, false) => unreachable!("clean nodes return early"),
        }

        if self.sync_on_commit {
            self.file.sync_data()?;
        }

        trace!("committed slot {}", node.handle);
        node.overhead_dirty = false;
        node.body_dirty = false;
        Ok(())
    }

    /// Marks a slot deleted and returns it to the allocation pool. The slot is
    /// zero filled so stale overhead never leaks into a reused slot.
    pub fn free(&mut self, handle: Handle) -> Result<(), StorageError> {
        self.check_bounds(handle);

        let mut status = [0; STATUS_SIZE];
        self.read_bytes(self.offset(handle.0), &mut status)?;
        if !self.live_status(handle, status[0])? {
            error!("{:?}: slot {handle} freed twice", self.path);
            return Ok(());
        }

        let mut buf = vec![0; self.slot_width()];
        buf[0] = STATUS_DELETED;
        self.write_bytes(self.offset(handle.0), &buf)?;

        self.live -= 1;
        self.free.push(handle.0);
        trace!("freed slot {handle}");
        Ok(())
    }

    /// Key column of every live slot, in slot order. Only the status, overhead and
    /// key bytes of each slot are read.
    pub fn scan_keys(&mut self) -> Result<Vec<(Handle, Vec<u8>)>, StorageError> {
        let head = self.body_offset() + self.schema.key_width();
        let skip = (self.slot_width() - head) as i64;
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        let mut out = Vec::with_capacity(self.live as usize);
        let mut buf = vec![0; head];
        for index in 0..self.slots {
            reader.read_exact(&mut buf)?;
            reader.seek_relative(skip)?;
            if self.live_status(Handle(index), buf[0])? {
                out.push((Handle(index), buf[self.body_offset()..].to_vec()));
            }
        }

        debug!("scanned {} keys from {:?}", out.len(), self.path);
        Ok(out)
    }

    /// Reads one of the store-level handles kept in the file header.
    pub fn header_handle(&self, i: usize) -> Option<Handle> {
        match self.header.handles[i] {
            NULL_HANDLE => None,
            index => Some(Handle(index)),
        }
    }

    pub fn set_header_handle(&mut self, i: usize, handle: Option<Handle>) -> Result<(), StorageError> {
        if let Some(h) = handle {
            self.check_bounds(h);
        }
        self.header.handles[i] = handle.map_or(NULL_HANDLE, |h| h.0);
        self.write_header()
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), StorageError> {
        self.flush()?;
        info!("closed slot file {:?}", self.path);
        Ok(())
    }

    fn offset(&self, index: u64) -> u64 {
        HEADER_SIZE as u64 + index * self.slot_width() as u64
    }

    fn body_offset(&self) -> usize {
        STATUS_SIZE + self.overhead
    }

    fn check_bounds(&self, handle: Handle) {
        if handle.0 >= self.slots {
            panic!(
                "{:?}: handle {handle} out of bounds ({} slots)",
                self.path, self.slots
            );
        }
    }

    fn check_widths(&self, overhead: &[u8], body: &[u8]) -> Result<(), StorageError> {
        if overhead.len() != self.overhead || body.len() != self.body_width() {
            return Err(StorageError::Row {
                action: "write slot".into(),
                error: format!(
                    "overhead/body of {}/{} bytes, slot expects {}/{}",
                    overhead.len(),
                    body.len(),
                    self.overhead,
                    self.body_width()
                ),
            });
        }
        Ok(())
    }

    fn live_status(&self, handle: Handle, status: u8) -> Result<bool, StorageError> {
        match status {
            STATUS_LIVE => Ok(true),
            STATUS_EMPTY | STATUS_DELETED => Ok(false),
            other => Err(self.corrupted(format!(
                "slot {handle} has unknown status byte {other:#04x}"
            ))),
        }
    }

    fn corrupted(&self, reason: String) -> StorageError {
        error!("{:?} is corrupted: {reason}", self.path);
        StorageError::Corrupted {
            path: self.path.clone(),
            reason,
        }
    }

    fn scan_status(&mut self) -> Result<(), StorageError> {
        let skip = (self.slot_width() - STATUS_SIZE) as i64;
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        let mut free = Vec::new();
        let mut status = [0; STATUS_SIZE];
        for index in 0..self.slots {
            reader.read_exact(&mut status)?;
            reader.seek_relative(skip)?;
            if self.live_status(Handle(index), status[0])? {
                self.live += 1;
            } else {
                free.push(index);
            }
        }

        // Lowest slots are handed out first.
        free.reverse();
        self.free = free;
        Ok(())
    }

    fn read_header(&mut self, len: u64) -> Result<(), StorageError> {
        if len < HEADER_SIZE as u64 {
            return Err(self.corrupted(format!("file of {len} bytes has no header")));
        }

        let mut buf = [0; HEADER_SIZE];
        self.read_bytes(0, &mut buf)?;
        let (header, _): (FileHeader, usize) = decode_from_slice(&buf, header_config())?;
        trace!("slot file header: {header:?}");

        if header.magic != MAGIC {
            return Err(self.corrupted("not a slot file".into()));
        }
        if header.version != VERSION {
            return Err(self.corrupted(format!("unsupported version {}", header.version)));
        }
        if header.overhead != self.header.overhead || header.body != self.header.body {
            return Err(self.corrupted(format!(
                "file has overhead/body {}/{}, opened with {}/{}",
                header.overhead, header.body, self.header.overhead, self.header.body
            )));
        }

        let data = len - HEADER_SIZE as u64;
        let width = self.slot_width() as u64;
        if data % width != 0 {
            return Err(self.corrupted(format!(
                "{} trailing bytes after the last full slot",
                data % width
            )));
        }

        self.slots = data / width;
        self.header = header;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        let mut buf = [0; HEADER_SIZE];
        encode_into_slice(self.header.clone(), &mut buf, header_config())?;
        self.write_bytes(0, &buf)
    }

    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

/// Header codec. Every read and write of the header goes through it.
fn header_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

fn width_u32(width: usize, path: &Path) -> Result<u32, StorageError> {
    u32::try_from(width).map_err(|_| StorageError::Schema(format!(
        "{path:?}: slot part of {width} bytes is too wide"
    )))
}
