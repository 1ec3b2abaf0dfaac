//! Append planning: turns an uploaded CSV batch into the bytes to append.
//!
//! A store file holds at most one header line, and it is always the first
//! non-blank line, the same line [`crate::Records`] reads column names from.
//! The planner keeps that invariant by writing an incoming batch verbatim
//! (minus leading blank lines) when the store has no header yet, and by
//! dropping the batch's header line otherwise. Batches for one stream are assumed to share a
//! column schema; [`plan_append`] can optionally verify that.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// What the planner needs to know about the current store file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    /// Whether the store file exists at all.
    pub exists: bool,
    /// Size of the store file in bytes.
    pub len: u64,
    /// First non-blank line of the store, without its terminator.
    pub header: Option<String>,
    /// Whether the existing content ends with `\n`.
    pub ends_with_newline: bool,
}

impl StoreState {
    /// State of a store that has never been written.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Build the state from in-memory store content.
    pub fn from_content(content: &[u8]) -> Self {
        let body = skip_blank_lines(content);
        let header = (!body.is_empty()).then(|| {
            let (first, _) = split_first_line(body);
            String::from_utf8_lossy(trim_line_end(first)).into_owned()
        });
        Self {
            exists: true,
            len: content.len() as u64,
            header,
            ends_with_newline: content.ends_with(b"\n"),
        }
    }

    /// Inspect a store file on disk, reading only up to its header and its last byte.
    pub fn inspect(path: &Path) -> io::Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::absent()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self {
                exists: true,
                ..Self::default()
            });
        }

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let header = loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break None;
            }
            if !is_blank(&line) {
                break Some(String::from_utf8_lossy(trim_line_end(&line)).into_owned());
            }
        };

        let mut file = reader.into_inner();
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;

        Ok(Self {
            exists: true,
            len,
            header,
            ends_with_newline: last[0] == b'\n',
        })
    }

    /// Whether the store already carries its header line.
    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }
}

/// The outcome of planning one append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendPlan {
    /// Bytes to append to the end of the store file.
    pub bytes: Vec<u8>,
    /// True when these bytes become the store's first content (header included).
    pub creates: bool,
    /// Number of non-blank data lines in `bytes`.
    pub rows: usize,
}

impl AppendPlan {
    /// An append that writes nothing.
    pub fn is_noop(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Compute the bytes to append for `incoming` given the current store state.
///
/// Leading blank lines of `incoming` are ignored; a batch with nothing else
/// fails with [`Error::EmptyUpload`]. With `header_check` set, an existing store whose header differs from the
/// incoming batch's first line fails with [`Error::SchemaMismatch`].
pub fn plan_append(state: &StoreState, incoming: &[u8], header_check: bool) -> Result<AppendPlan> {
    let payload = skip_blank_lines(incoming);
    if payload.is_empty() {
        return Err(Error::EmptyUpload);
    }

    let (header_line, data) = split_first_line(payload);

    let Some(existing_header) = state.header.as_deref() else {
        debug!(
            "Store has no header yet, writing {} bytes verbatim",
            payload.len()
        );
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        // Blank-only leftovers must not swallow the new header line
        if state.len > 0 && !state.ends_with_newline {
            bytes.extend_from_slice(line_terminator(header_line));
        }
        bytes.extend_from_slice(payload);
        return Ok(AppendPlan {
            bytes,
            creates: true,
            rows: count_rows(data),
        });
    };

    if header_check {
        let found = String::from_utf8_lossy(trim_line_end(header_line));
        if found != existing_header {
            return Err(Error::SchemaMismatch {
                expected: existing_header.to_string(),
                found: found.into_owned(),
            });
        }
    }

    let rows = count_rows(data);
    if rows == 0 {
        debug!("Incoming batch has no data lines, nothing to append");
        return Ok(AppendPlan::default());
    }

    let mut bytes = Vec::with_capacity(data.len() + 2);
    if !state.ends_with_newline {
        bytes.extend_from_slice(line_terminator(header_line));
    }
    bytes.extend_from_slice(data);

    Ok(AppendPlan {
        bytes,
        creates: false,
        rows,
    })
}

/// Split off the first line, keeping its terminator attached to it.
fn split_first_line(content: &[u8]) -> (&[u8], &[u8]) {
    match content.iter().position(|&b| b == b'\n') {
        Some(pos) => content.split_at(pos + 1),
        None => (content, &[]),
    }
}

/// Drop leading lines that are empty once their terminator is removed.
fn skip_blank_lines(mut content: &[u8]) -> &[u8] {
    loop {
        let (first, rest) = split_first_line(content);
        if first.is_empty() || !is_blank(first) {
            return content;
        }
        content = rest;
    }
}

fn is_blank(line: &[u8]) -> bool {
    trim_line_end(line).is_empty()
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// The terminator to use when separating appended rows: whatever the batch uses.
fn line_terminator(header_line: &[u8]) -> &'static [u8] {
    if header_line.ends_with(b"\r\n") {
        b"\r\n"
    } else {
        b"\n"
    }
}

fn count_rows(data: &[u8]) -> usize {
    data.split(|&b| b == b'\n')
        .filter(|line| !trim_line_end(line).iter().all(u8::is_ascii_whitespace))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(store: &[u8], incoming: &[u8]) -> Vec<u8> {
        let state = if store.is_empty() {
            StoreState::absent()
        } else {
            StoreState::from_content(store)
        };
        let plan = plan_append(&state, incoming, false).unwrap();
        let mut out = store.to_vec();
        out.extend_from_slice(&plan.bytes);
        out
    }

    #[test]
    fn test_absent_store_takes_payload_verbatim() {
        let plan = plan_append(&StoreState::absent(), b"ts,val\n1,10\n2,20", false).unwrap();
        assert_eq!(plan.bytes, b"ts,val\n1,10\n2,20");
        assert!(plan.creates);
        assert_eq!(plan.rows, 2);
    }

    #[test]
    fn test_existing_store_drops_incoming_header() {
        let out = apply(b"ts,val\n1,10\n2,20", b"ts,val\n3,30");
        assert_eq!(out, b"ts,val\n1,10\n2,20\n3,30");
    }

    #[test]
    fn test_existing_store_with_trailing_newline() {
        let out = apply(b"ts,val\n1,10\n", b"ts,val\n2,20\n");
        assert_eq!(out, b"ts,val\n1,10\n2,20\n");
    }

    #[test]
    fn test_crlf_batches_keep_their_terminator() {
        // Python's csv module writes \r\n
        let out = apply(b"ts,val\r\n1,10", b"ts,val\r\n2,20\r\n");
        assert_eq!(out, b"ts,val\r\n1,10\r\n2,20\r\n");
    }

    #[test]
    fn test_header_only_batch_is_noop() {
        let state = StoreState::from_content(b"ts,val\n1,10\n");
        for incoming in [&b"ts,val"[..], b"ts,val\n", b"ts,val\r\n", b"ts,val\n\n"] {
            let plan = plan_append(&state, incoming, false).unwrap();
            assert!(plan.is_noop(), "{:?}", String::from_utf8_lossy(incoming));
            assert_eq!(plan.rows, 0);
        }
    }

    #[test]
    fn test_header_only_batch_creates_store() {
        let plan = plan_append(&StoreState::absent(), b"ts,val\n", false).unwrap();
        assert_eq!(plan.bytes, b"ts,val\n");
        assert!(plan.creates);
        assert_eq!(plan.rows, 0);
    }

    #[test]
    fn test_empty_existing_file_gets_header() {
        let state = StoreState {
            exists: true,
            ..StoreState::default()
        };
        let plan = plan_append(&state, b"ts,val\n1,10", false).unwrap();
        assert_eq!(plan.bytes, b"ts,val\n1,10");
        assert!(plan.creates);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let err = plan_append(&StoreState::absent(), b"", false).unwrap_err();
        assert!(matches!(err, Error::EmptyUpload));
    }

    #[test]
    fn test_blank_only_payload_rejected() {
        for incoming in [&b"\n"[..], b"\r\n", b"\n\n\r\n"] {
            let err = plan_append(&StoreState::absent(), incoming, false).unwrap_err();
            assert!(matches!(err, Error::EmptyUpload), "{:?}", incoming);

            let state = StoreState::from_content(b"ts,val\n1,10\n");
            let err = plan_append(&state, incoming, false).unwrap_err();
            assert!(matches!(err, Error::EmptyUpload), "{:?}", incoming);
        }
    }

    #[test]
    fn test_leading_blank_lines_are_not_a_header() {
        let plan = plan_append(&StoreState::absent(), b"\n\r\nts,val\n1,10\n", false).unwrap();
        assert_eq!(plan.bytes, b"ts,val\n1,10\n");
        assert_eq!(plan.rows, 1);

        let state = StoreState::from_content(b"ts,val\n1,10\n");
        let plan = plan_append(&state, b"\nts,val\n2,20\n", false).unwrap();
        assert_eq!(plan.bytes, b"2,20\n");
    }

    #[test]
    fn test_blank_only_store_takes_header() {
        let state = StoreState::from_content(b"\n\n");
        assert!(state.exists);
        assert!(!state.has_header());

        let plan = plan_append(&state, b"ts,val\n1,10\n", false).unwrap();
        assert!(plan.creates);
        assert_eq!(plan.bytes, b"ts,val\n1,10\n");

        // No trailing newline: the header goes on a line of its own
        let state = StoreState::from_content(b"\n\r");
        let plan = plan_append(&state, b"ts,val\n1,10\n", false).unwrap();
        assert_eq!(plan.bytes, b"\nts,val\n1,10\n");
    }

    #[test]
    fn test_header_check_detects_mismatch() {
        let state = StoreState::from_content(b"ts,val\n1,10\n");
        let err = plan_append(&state, b"ts,other\n2,20\n", true).unwrap_err();
        match err {
            Error::SchemaMismatch { expected, found } => {
                assert_eq!(expected, "ts,val");
                assert_eq!(found, "ts,other");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_header_check_ignores_line_endings() {
        let state = StoreState::from_content(b"ts,val\n1,10\n");
        let plan = plan_append(&state, b"ts,val\r\n2,20\r\n", true).unwrap();
        assert_eq!(plan.bytes, b"2,20\r\n");
    }

    #[test]
    fn test_mismatched_header_accepted_without_check() {
        let state = StoreState::from_content(b"ts,val\n1,10\n");
        let plan = plan_append(&state, b"ts,other\n2,20\n", false).unwrap();
        assert_eq!(plan.bytes, b"2,20\n");
    }

    #[test]
    fn test_inspect_reads_header_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.csv");

        assert_eq!(StoreState::inspect(&path).unwrap(), StoreState::absent());

        std::fs::write(&path, b"").unwrap();
        let state = StoreState::inspect(&path).unwrap();
        assert!(state.exists);
        assert!(!state.has_header());

        std::fs::write(&path, b"ts,val\r\n1,10").unwrap();
        let state = StoreState::inspect(&path).unwrap();
        assert_eq!(state.header.as_deref(), Some("ts,val"));
        assert!(!state.ends_with_newline);
        assert_eq!(state.len, 12);
        assert_eq!(state, StoreState::from_content(b"ts,val\r\n1,10"));

        std::fs::write(&path, b"\n\r\nts,val\n1,10\n").unwrap();
        let state = StoreState::inspect(&path).unwrap();
        assert_eq!(state.header.as_deref(), Some("ts,val"));
        assert_eq!(state, StoreState::from_content(b"\n\r\nts,val\n1,10\n"));

        std::fs::write(&path, b"\n\n").unwrap();
        let state = StoreState::inspect(&path).unwrap();
        assert!(state.exists);
        assert!(!state.has_header());
        assert!(state.ends_with_newline);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn batch(rows: &[(u32, u32)]) -> Vec<u8> {
        let mut out = String::from("ts,val\n");
        for (ts, val) in rows {
            out.push_str(&format!("{},{}\n", ts, val));
        }
        out.into_bytes()
    }

    proptest! {
        /// However many batches are applied, the header appears exactly once and
        /// every data row survives in order.
        #[test]
        fn single_header_after_appends(batches in proptest::collection::vec(
            proptest::collection::vec((any::<u32>(), any::<u32>()), 0..5), 1..8)
        ) {
            let mut store = Vec::new();
            for rows in &batches {
                let state = if store.is_empty() {
                    StoreState::absent()
                } else {
                    StoreState::from_content(&store)
                };
                let plan = plan_append(&state, &batch(rows), false).unwrap();
                store.extend_from_slice(&plan.bytes);
            }

            let text = String::from_utf8(store).unwrap();
            prop_assert_eq!(text.matches("ts,val").count(), 1);
            prop_assert!(text.starts_with("ts,val\n"));

            let expected: Vec<String> = batches
                .iter()
                .flatten()
                .map(|(ts, val)| format!("{},{}", ts, val))
                .collect();
            let actual: Vec<&str> = text.lines().skip(1).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
