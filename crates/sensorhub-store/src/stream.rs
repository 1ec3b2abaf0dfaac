//! Sensor stream definitions and store path resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length of a stream identifier.
pub const MAX_STREAM_ID_LEN: usize = 32;

/// A configured sensor stream: a stable identifier and the file its store lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Identifier used in request paths (e.g. `pms`).
    pub id: String,
    /// Store file name, relative to the storage root.
    pub file: String,
}

impl StreamSpec {
    /// Create a stream spec.
    pub fn new(id: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
        }
    }

    /// The stream set of the original deployment: particulate matter (PMS5003),
    /// CO gas (MQ-7) and VOC (SGP40).
    pub fn defaults() -> Vec<StreamSpec> {
        vec![
            StreamSpec::new("pms", "pmsdata.csv"),
            StreamSpec::new("mq7", "mq7data.csv"),
            StreamSpec::new("sgp40", "sgp40data.csv"),
        ]
    }

    /// Check the identifier and file name, returning a description of the
    /// first problem found.
    pub fn check(&self) -> std::result::Result<(), String> {
        check_id(&self.id)?;
        check_file_name(&self.file)
    }
}

fn check_id(id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err("stream id cannot be empty".to_string());
    }
    if id.len() > MAX_STREAM_ID_LEN {
        return Err(format!(
            "stream id '{}' is too long (maximum {} characters)",
            id, MAX_STREAM_ID_LEN
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "stream id '{}' may only contain letters, digits, '-' and '_'",
            id
        ));
    }
    Ok(())
}

fn check_file_name(file: &str) -> std::result::Result<(), String> {
    if file.is_empty() {
        return Err("store file name cannot be empty".to_string());
    }
    if file == "." || file == ".." || file.contains(['/', '\\']) {
        return Err(format!("store file '{}' must be a plain file name", file));
    }
    Ok(())
}

/// Summary of one stream's store, as reported by [`crate::Store::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Stream identifier.
    pub id: String,
    /// Store file name.
    pub file: String,
    /// Whether anything has ever been ingested.
    pub exists: bool,
    /// Store file size in bytes (0 when absent).
    pub size_bytes: u64,
}

/// Create `dir` (and its parents) if it does not exist yet.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| Error::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Resolve the store file for a stream under `root`.
pub(crate) fn resolve(root: &Path, spec: &StreamSpec) -> PathBuf {
    root.join(&spec.file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_streams() {
        let streams = StreamSpec::defaults();
        let ids: Vec<&str> = streams.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["pms", "mq7", "sgp40"]);
        assert!(streams.iter().all(|s| s.check().is_ok()));
    }

    #[test]
    fn test_check_rejects_bad_ids() {
        assert!(StreamSpec::new("", "a.csv").check().is_err());
        assert!(StreamSpec::new("pm s", "a.csv").check().is_err());
        assert!(StreamSpec::new("../pms", "a.csv").check().is_err());
        assert!(StreamSpec::new("a".repeat(33), "a.csv").check().is_err());
        assert!(StreamSpec::new("sgp-40_b", "a.csv").check().is_ok());
    }

    #[test]
    fn test_check_rejects_paths_as_file_names() {
        assert!(StreamSpec::new("pms", "").check().is_err());
        assert!(StreamSpec::new("pms", "..").check().is_err());
        assert!(StreamSpec::new("pms", "../pms.csv").check().is_err());
        assert!(StreamSpec::new("pms", "sub\\pms.csv").check().is_err());
    }

    #[test]
    fn test_resolve_joins_root() {
        let spec = StreamSpec::new("mq7", "mq7data.csv");
        assert_eq!(
            resolve(Path::new("/data/uploads"), &spec),
            PathBuf::from("/data/uploads/mq7data.csv")
        );
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Second call is a no-op
        ensure_dir(&nested).unwrap();
    }
}
