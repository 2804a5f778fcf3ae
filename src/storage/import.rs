//! Bulk import from delimited text, one record per line.
use std::io::BufRead;

use log::{info, warn};

use super::{StorageError, row::Row, schema::RowSchema};

/// Outcome of a text import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// `(line number, reason)` for every line that was rejected.
    pub rejected: Vec<(usize, String)>,
}

/// Parses `reader` line by line and hands each row to `sink`.
///
/// Blank lines and lines starting with `#` are skipped. A line that does not parse
/// is logged and recorded in the report; errors from `sink` or from reading abort
/// the import.
pub(crate) fn import_lines<R, F>(
    reader: R,
    schema: &RowSchema,
    delimiter: char,
    mut sink: F,
) -> Result<ImportReport, StorageError>
where
    R: BufRead,
    F: FnMut(Row) -> Result<(), StorageError>,
{
    let mut report = ImportReport::default();

    for (i, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let line = match std::str::from_utf8(&line) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(e) => {
                warn!("import line {} rejected: {e}", i + 1);
                report.rejected.push((i + 1, format!("not valid UTF-8: {e}")));
                continue;
            }
        };
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        match Row::from_text(schema, line, delimiter) {
            Ok(row) => {
                sink(row)?;
                report.imported += 1;
            }
            Err(e) => {
                warn!("import line {} rejected: {e}", i + 1);
                report.rejected.push((i + 1, e.to_string()));
            }
        }
    }

    info!(
        "imported {} rows, rejected {}",
        report.imported,
        report.rejected.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_skips_bad_lines() {
        let schema = RowSchema::new(vec![("key", 4), ("value", 8)]).unwrap();
        let input = "# header\naaaa,1\nbbbb\n\ncccccc,3\r\ndddd,4\r\n";

        let mut rows = Vec::new();
        let report = import_lines(input.as_bytes(), &schema, ',', |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();

        assert_eq!(report.imported, 2);
        assert_eq!(
            report.rejected.iter().map(|(l, _)| *l).collect::<Vec<_>>(),
            vec![3, 5]
        );
        assert_eq!(rows[0].to_text(','), "aaaa,1");
        assert_eq!(rows[1].to_text(','), "dddd,4");
    }

    #[test]
    fn import_rejects_invalid_utf8_line() {
        let schema = RowSchema::new(vec![("key", 4), ("value", 8)]).unwrap();
        let input: &[u8] = b"aaaa,1\nbb\xffb,2\ncccc,3\n";

        let mut rows = Vec::new();
        let report = import_lines(input, &schema, ',', |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();

        assert_eq!(report.imported, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 2);
        assert_eq!(rows[1].to_text(','), "cccc,3");
    }

    #[test]
    fn import_sink_error_aborts() {
        let schema = RowSchema::new(vec![("key", 4)]).unwrap();
        let res = import_lines("aaaa\nbbbb\n".as_bytes(), &schema, ',', |_| {
            Err(StorageError::Poisoned)
        });
        assert!(res.is_err());
    }
}
