//! Conversion of store content into structured records.

use std::io::Cursor;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::warn;

use crate::error::{Error, Result};

/// How rows whose field count differs from the header are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowMode {
    /// Skip the row and count it (see [`Records::skipped`]).
    #[default]
    Lenient,
    /// Stop with [`Error::ConversionFailure`].
    Strict,
}

/// One data line paired with the header columns.
///
/// Values are kept as raw strings. Serializes as a map whose keys keep the
/// header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl Record {
    /// Value of `column`, if the header has it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i].as_str())
    }

    /// Header columns, in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Field values, aligned with [`Record::columns`].
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// `(column, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.as_str(), v.as_str()))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Lazy, one-shot sequence of records parsed from a store snapshot.
///
/// The first non-empty line is the header; blank lines are ignored. Fields are
/// split on `,` with no quote handling.
pub struct Records {
    reader: csv::Reader<Cursor<Vec<u8>>>,
    columns: Arc<[String]>,
    mode: RowMode,
    record: csv::StringRecord,
    skipped: usize,
    done: bool,
}

impl Records {
    /// Parse the header of `content` and prepare to iterate its data lines.
    pub fn from_bytes(content: Vec<u8>, mode: RowMode) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(Cursor::new(content));

        let columns: Arc<[String]> = reader
            .headers()
            .map_err(|e| Error::ConversionFailure(format!("invalid header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        Ok(Self {
            reader,
            columns,
            mode,
            record: csv::StringRecord::new(),
            skipped: 0,
            done: false,
        })
    }

    /// Header columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows skipped so far for having the wrong field count.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for Records {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::ConversionFailure(e.to_string())));
                }
                Ok(true) if self.record.len() == self.columns.len() => {
                    return Some(Ok(Record {
                        columns: Arc::clone(&self.columns),
                        values: self.record.iter().map(str::to_string).collect(),
                    }));
                }
                Ok(true) => {
                    let line = self.record.position().map_or(0, |p| p.line());
                    let message = format!(
                        "line {} has {} fields, header has {}",
                        line,
                        self.record.len(),
                        self.columns.len()
                    );
                    match self.mode {
                        RowMode::Lenient => {
                            warn!("Skipping malformed row: {}", message);
                            self.skipped += 1;
                        }
                        RowMode::Strict => {
                            self.done = true;
                            return Some(Err(Error::ConversionFailure(message)));
                        }
                    }
                }
            }
        }
        None
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Converting arbitrary bytes never panics, whatever the mode.
        #[test]
        fn parse_never_panics(data: Vec<u8>, strict: bool) {
            let mode = if strict { RowMode::Strict } else { RowMode::Lenient };
            if let Ok(records) = Records::from_bytes(data, mode) {
                for _ in records {}
            }
        }

        /// Every emitted record is aligned with the header.
        #[test]
        fn records_match_header_width(lines in proptest::collection::vec("[a-z0-9]{0,3}(,[a-z0-9]{0,3}){0,3}", 1..20)) {
            let content = lines.join("\n").into_bytes();
            let records = Records::from_bytes(content, RowMode::Lenient).unwrap();
            let width = records.columns().len();
            for record in records {
                prop_assert_eq!(record.unwrap().values().len(), width);
            }
        }
    }
}
