//! Temporary upload artifacts.

use std::io::{Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// An uploaded CSV batch spooled to a temporary file.
///
/// The temporary file is deleted when the batch is dropped, so handing a batch
/// to [`crate::Store::ingest`] guarantees its disposal whichever way the
/// ingestion ends.
#[derive(Debug)]
pub struct UploadBatch {
    file: NamedTempFile,
    name: Option<String>,
    len: u64,
}

impl UploadBatch {
    /// Create an empty batch in `dir`, remembering the client's file name.
    pub fn create_in(dir: &Path, name: Option<String>) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".csv")
            .tempfile_in(dir)
            .map_err(|e| Error::ReadFailure {
                path: dir.to_path_buf(),
                source: e,
            })?;
        debug!("Spooling upload to {}", file.path().display());
        Ok(Self {
            file,
            name,
            len: 0,
        })
    }

    /// Create a batch in `dir` holding `content`.
    pub fn from_bytes_in(dir: &Path, content: &[u8]) -> Result<Self> {
        let mut batch = Self::create_in(dir, None)?;
        batch.write_chunk(content)?;
        Ok(batch)
    }

    /// Append a chunk of the upload body.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .map_err(|e| Error::ReadFailure {
                path: self.file.path().to_path_buf(),
                source: e,
            })?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Read the whole batch back.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let path = self.file.path().to_path_buf();
        let read_failure = |e| Error::ReadFailure {
            path: path.clone(),
            source: e,
        };

        self.file.flush().map_err(read_failure)?;
        let mut reader = self.file.reopen().map_err(read_failure)?;
        let mut content = Vec::with_capacity(self.len as usize);
        reader.read_to_end(&mut content).map_err(read_failure)?;
        Ok(content)
    }

    /// Location of the temporary file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// File name supplied by the client, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for UploadBatch {
    fn drop(&mut self) {
        // NamedTempFile's own drop retries silently; removing here makes failures visible.
        let path = self.file.path();
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed upload {}", path.display()),
            Err(e) => warn!("Failed to remove upload {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = UploadBatch::create_in(dir.path(), Some("pms5003_data.csv".into())).unwrap();
        assert!(batch.is_empty());

        batch.write_chunk(b"ts,val\n").unwrap();
        batch.write_chunk(b"1,10\n").unwrap();

        assert_eq!(batch.len(), 12);
        assert_eq!(batch.name(), Some("pms5003_data.csv"));
        assert_eq!(batch.read_all().unwrap(), b"ts,val\n1,10\n");
    }

    #[test]
    fn test_drop_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let batch = UploadBatch::from_bytes_in(dir.path(), b"ts,val\n1,10\n").unwrap();
        let path = batch.path().to_path_buf();
        assert!(path.exists());

        drop(batch);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let batch = UploadBatch::from_bytes_in(dir.path(), b"ts,val\n").unwrap();
        std::fs::remove_file(batch.path()).unwrap();
        // Must not panic
        drop(batch);
    }

    #[test]
    fn test_create_in_missing_dir_is_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = UploadBatch::create_in(&dir.path().join("missing"), None).unwrap_err();
        assert!(matches!(err, Error::ReadFailure { .. }));
    }
}
