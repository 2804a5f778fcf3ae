//! Slot-file storage engine.
//!
//! Records live in fixed-width slots of a single backing file. The [`RecordStore`]
//! owns the file and hands out [`Handle`]s; two overlays give the slots meaning:
//!
//! - [`Table`]: a RAM hash index from primary key to handle, rebuilt on open.
//! - [`Stack`]: a doubly linked chain threaded through per-slot overhead bytes,
//!   usable from both ends.
//!
//! # Example
//! ```rust
//! use strata::storage::{RowSchema, Table};
//!
//! let dir = std::env::temp_dir().join("strata-doc-mod");
//! std::fs::create_dir_all(&dir).unwrap();
//! let schema = RowSchema::new(vec![("key", 4), ("value", 8)]).unwrap();
//! let table = Table::open(dir.join("users.db"), schema.clone()).unwrap();
//!
//! let row = schema.row(&["aaaa", "11111111"]).unwrap();
//! table.put(row.clone()).unwrap();
//! assert_eq!(table.get(b"aaaa").unwrap(), Some(row));
//! # table.close().unwrap();
//! # std::fs::remove_dir_all(&dir).unwrap();
//! ```
pub mod import;
pub mod index;
pub mod registry;
pub mod row;
pub mod schema;
pub mod stack;
pub mod store;
pub mod table;

pub use error::{StorageError, StoreError};
pub use import::ImportReport;
pub use index::{DoublesReport, RamIndex};
pub use registry::{Introspect, Registry, StoreKind, StoreStats};
pub use row::Row;
pub use schema::{Column, RowSchema};
pub use stack::{Direction, Stack, StackIter};
pub use store::{Handle, Node, RecordStore};
pub use table::{Rows, Table};

pub mod header {
    pub mod file {
        pub(crate) const HEADER_SIZE: usize = 128;
        pub(crate) const MAGIC: [u8; 8] = *b"STRATA\0\x01";
        pub(crate) const VERSION: u32 = 1;

        /// Store-level handle slots available to overlays.
        pub(crate) const HEADER_HANDLES: usize = 4;
    }

    pub mod slot {
        pub(crate) const STATUS_SIZE: usize = size_of::<u8>();
        pub(crate) const HANDLE_SIZE: usize = size_of::<u64>();

        /// Never written; a zero-extended file reads as empty slots.
        pub const STATUS_EMPTY: u8 = 0x00;
        pub const STATUS_LIVE: u8 = 0x01;
        /// Freed and waiting to be reused.
        pub const STATUS_DELETED: u8 = 0x80;

        /// On-disk encoding of `None` in any handle field.
        pub const NULL_HANDLE: u64 = u64::MAX;
    }

    pub mod stack {
        use super::slot::HANDLE_SIZE;

        pub(crate) const LEFT: usize = 0;
        pub(crate) const RIGHT: usize = LEFT + HANDLE_SIZE;
        pub(crate) const OVERHEAD_SIZE: usize = RIGHT + HANDLE_SIZE;

        pub(crate) const ROOT_HANDLE: usize = 0;
        pub(crate) const TAIL_HANDLE: usize = 1;
    }
}

/// Tunables shared by tables and stacks.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity slack applied to the index when it is built.
    pub index_growth: f64,
    /// Desync repairs allowed per open instance before operations fail.
    pub max_repairs: usize,
    /// Call `sync_data` after each commit.
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_growth: 1.5,
            max_repairs: 16,
            sync_on_commit: false,
        }
    }
}

pub mod error {
    use std::{io, path::PathBuf};

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StoreError {
        #[error("io error: {0}")]
        Io(#[from] io::Error),
        #[error("failed to encode header: {0}")]
        Encode(#[from] bincode::error::EncodeError),
        #[error("failed to decode header: {0}")]
        Decode(#[from] bincode::error::DecodeError),
    }

    #[derive(Debug, Error)]
    pub enum StorageError {
        #[error("[store error]: {cause}")]
        Store { cause: StoreError },

        #[error("[schema error]: {0}")]
        Schema(String),

        #[error("[row error][{action}]: {error}")]
        Row { action: String, error: String },

        #[error("[corrupted][{path:?}]: {reason}")]
        Corrupted { path: PathBuf, reason: String },

        #[error("[repair limit]: {limit} repairs exceeded, the file needs to be rebuilt")]
        RepairLimit { limit: usize },

        #[error("[lock error]: instance lock poisoned")]
        Poisoned,
    }

    impl From<io::Error> for StorageError {
        fn from(e: io::Error) -> Self {
            StorageError::Store {
                cause: StoreError::Io(e),
            }
        }
    }

    impl From<bincode::error::EncodeError> for StorageError {
        fn from(e: bincode::error::EncodeError) -> Self {
            StorageError::Store {
                cause: StoreError::Encode(e),
            }
        }
    }

    impl From<bincode::error::DecodeError> for StorageError {
        fn from(e: bincode::error::DecodeError) -> Self {
            StorageError::Store {
                cause: StoreError::Decode(e),
            }
        }
    }
}
