pub mod storage;

pub use storage::{
    Direction, Registry, Row, RowSchema, Stack, StorageError, StoreConfig, Table,
};
