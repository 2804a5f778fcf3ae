use std::{collections::HashSet, sync::Arc};

use super::{error::StorageError, row::Row};

/// A named, fixed-width column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub width: usize,
    pub offset: usize,
}

/// Immutable description of a fixed-width record. Column 0 is the primary key.
///
/// Cloning is cheap; rows keep a clone of the schema they were built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    columns: Arc<[Column]>,
    object_size: usize,
}

impl RowSchema {
    pub fn new<I, S>(columns: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut offset = 0;

        for (name, width) in columns {
            let name = name.into();
            if width == 0 {
                return Err(StorageError::Schema(format!(
                    "column '{name}' has zero width"
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(StorageError::Schema(format!("duplicate column '{name}'")));
            }
            out.push(Column {
                name,
                width,
                offset,
            });
            offset += width;
        }

        if out.is_empty() {
            return Err(StorageError::Schema("schema has no columns".into()));
        }

        Ok(Self {
            columns: out.into(),
            object_size: offset,
        })
    }

    /// Total byte width of one encoded row.
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn key_width(&self) -> usize {
        self.columns[0].width
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.columns.iter().enumerate().find(|(_, c)| c.name == name)
    }

    /// Builds a row from one value per column; shorter values are zero padded.
    pub fn row<T: AsRef<[u8]>>(&self, values: &[T]) -> Result<Row, StorageError> {
        Row::from_columns(self, values)
    }

    /// Pads a key to the key column width, as it is stored.
    pub fn encode_key(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        let width = self.key_width();
        if key.len() > width {
            return Err(StorageError::Row {
                action: "encode key".into(),
                error: format!("key of {} bytes exceeds width {width}", key.len()),
            });
        }
        let mut out = vec![0; width];
        out[..key.len()].copy_from_slice(key);
        Ok(out)
    }
}
