use std::fmt;

use super::{error::StorageError, schema::RowSchema};

/// A schema-encoded record of exactly `schema.object_size()` bytes.
#[derive(Debug, Clone)]
pub struct Row {
    schema: RowSchema,
    bytes: Vec<u8>,
}

impl Row {
    /// A zero-filled row.
    pub fn new(schema: &RowSchema) -> Self {
        Self {
            schema: schema.clone(),
            bytes: vec![0; schema.object_size()],
        }
    }

    pub fn from_bytes(schema: &RowSchema, bytes: Vec<u8>) -> Result<Self, StorageError> {
        if bytes.len() != schema.object_size() {
            return Err(StorageError::Row {
                action: "read bytes".into(),
                error: format!(
                    "unexpected size '{}', schema expects {}",
                    bytes.len(),
                    schema.object_size()
                ),
            });
        }
        Ok(Self {
            schema: schema.clone(),
            bytes,
        })
    }

    pub fn from_columns<T: AsRef<[u8]>>(
        schema: &RowSchema,
        values: &[T],
    ) -> Result<Self, StorageError> {
        if values.len() != schema.len() {
            return Err(StorageError::Row {
                action: "build row".into(),
                error: format!(
                    "expected {} columns, got {}",
                    schema.len(),
                    values.len()
                ),
            });
        }

        let mut row = Row::new(schema);
        for (i, value) in values.iter().enumerate() {
            row.set_column(i, value.as_ref())?;
        }
        Ok(row)
    }

    /// Parses one line of the text import format.
    ///
    /// Fields are separated by `delimiter`; each must fit its column width.
    pub fn from_text(schema: &RowSchema, line: &str, delimiter: char) -> Result<Self, StorageError> {
        let fields = line.split(delimiter).collect::<Vec<&str>>();
        Row::from_columns(schema, fields.as_slice())
    }

    /// Renders the row in the text import format. Trailing zero padding is dropped.
    pub fn to_text(&self, delimiter: char) -> String {
        (0..self.schema.len())
            .map(|i| String::from_utf8_lossy(self.column_trimmed(i)).into_owned())
            .collect::<Vec<String>>()
            .join(&delimiter.to_string())
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn key(&self) -> &[u8] {
        self.column(0)
    }

    /// Raw column bytes including padding.
    ///
    /// # Panics
    ///
    /// If `i` is not a column of the schema.
    pub fn column(&self, i: usize) -> &[u8] {
        let column = &self.schema.columns()[i];
        &self.bytes[column.offset..column.offset + column.width]
    }

    pub fn column_trimmed(&self, i: usize) -> &[u8] {
        let column = self.column(i);
        let end = column.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
        &column[..end]
    }

    pub fn set_column(&mut self, i: usize, value: &[u8]) -> Result<(), StorageError> {
        let column = self.schema.columns().get(i).ok_or_else(|| StorageError::Row {
            action: "set column".into(),
            error: format!("no column {i}"),
        })?;
        if value.len() > column.width {
            return Err(StorageError::Row {
                action: "set column".into(),
                error: format!(
                    "value for '{}' is {} bytes, column width is {}",
                    column.name,
                    value.len(),
                    column.width
                ),
            });
        }

        let (start, end) = (column.offset, column.offset + column.width);
        self.bytes[start..end].fill(0);
        self.bytes[start..start + value.len()].clone_from_slice(value);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text(' '))
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Row {}
