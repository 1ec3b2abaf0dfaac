//! Main store implementation.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::append::{self, StoreState};
use crate::error::{Error, Result};
use crate::records::{Records, RowMode};
use crate::stream::{self, StreamInfo, StreamSpec};
use crate::upload::UploadBatch;

/// How appends reach the disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Append in place and sync; a failed append is truncated away.
    #[default]
    Append,
    /// Write the full new content to a temporary file and rename it over the store.
    Atomic,
}

/// Store behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// How appends are persisted.
    pub durability: Durability,
    /// How malformed rows are handled on retrieval.
    pub row_mode: RowMode,
    /// Reject batches whose header differs from the stored one.
    pub header_check: bool,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Stream the batch was ingested into.
    pub stream: String,
    /// Whether this ingestion created the store's content.
    pub created: bool,
    /// Bytes appended to the store file.
    pub bytes_written: u64,
    /// Data rows appended.
    pub rows_appended: usize,
}

struct Stream {
    spec: StreamSpec,
    path: PathBuf,
    /// Writers hold this exclusively for a whole ingestion; readers share it
    /// while taking a snapshot.
    lock: RwLock<()>,
}

/// File-backed, append-only stores for a fixed set of sensor streams.
///
/// `Store` is `Sync`: share it behind an `Arc` and call it from any thread.
/// Ingestions into the same stream are serialized; different streams never
/// contend.
pub struct Store {
    root: PathBuf,
    streams: HashMap<String, Stream>,
    order: Vec<String>,
    options: StoreOptions,
}

impl Store {
    /// Open the stores for `specs` under `root`, creating `root` if needed.
    ///
    /// Stream ids must be unique, and so must file names (compared without
    /// case, since some filesystems ignore it): every store file belongs to
    /// exactly one stream and one lock.
    pub fn open<P: AsRef<Path>>(root: P, specs: &[StreamSpec], options: StoreOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        stream::ensure_dir(&root)?;

        let mut streams = HashMap::with_capacity(specs.len());
        let mut order = Vec::with_capacity(specs.len());
        let mut files = HashSet::with_capacity(specs.len());
        for spec in specs {
            spec.check().map_err(|reason| Error::InvalidStream {
                id: spec.id.clone(),
                reason,
            })?;
            if streams.contains_key(&spec.id) {
                return Err(Error::InvalidStream {
                    id: spec.id.clone(),
                    reason: "duplicate stream id".to_string(),
                });
            }
            if !files.insert(spec.file.to_lowercase()) {
                return Err(Error::InvalidStream {
                    id: spec.id.clone(),
                    reason: format!("store file '{}' is used by another stream", spec.file),
                });
            }

            let path = stream::resolve(&root, spec);
            debug!("Stream {} stored at {}", spec.id, path.display());
            order.push(spec.id.clone());
            streams.insert(
                spec.id.clone(),
                Stream {
                    spec: spec.clone(),
                    path,
                    lock: RwLock::new(()),
                },
            );
        }

        info!(
            "Opened {} stream store(s) at {}",
            streams.len(),
            root.display()
        );
        Ok(Self {
            root,
            streams,
            order,
            options,
        })
    }

    /// Open the default streams at the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(
            crate::default_store_root(),
            &StreamSpec::defaults(),
            StoreOptions::default(),
        )
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active options.
    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Configured stream identifiers, in configuration order.
    pub fn stream_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Store file location for a stream.
    pub fn store_path(&self, stream_id: &str) -> Result<&Path> {
        Ok(&self.stream(stream_id)?.path)
    }

    /// Whether anything has ever been ingested for a stream.
    pub fn exists(&self, stream_id: &str) -> Result<bool> {
        Ok(self.stream(stream_id)?.path.exists())
    }

    /// Describe every configured stream.
    pub fn describe(&self) -> Result<Vec<StreamInfo>> {
        self.order
            .iter()
            .map(|id| {
                let stream = self.stream(id)?;
                let (exists, size_bytes) = match std::fs::metadata(&stream.path) {
                    Ok(meta) => (true, meta.len()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => (false, 0),
                    Err(e) => {
                        return Err(Error::ReadFailure {
                            path: stream.path.clone(),
                            source: e,
                        });
                    }
                };
                Ok(StreamInfo {
                    id: stream.spec.id.clone(),
                    file: stream.spec.file.clone(),
                    exists,
                    size_bytes,
                })
            })
            .collect()
    }

    fn stream(&self, stream_id: &str) -> Result<&Stream> {
        self.streams
            .get(stream_id)
            .ok_or_else(|| Error::UnknownStream(stream_id.to_string()))
    }
}

// Ingestion
impl Store {
    /// Ingest an uploaded batch into a stream's store.
    ///
    /// The batch is consumed: its temporary file is removed when this call
    /// returns, after the append has either completed or failed.
    pub fn ingest(&self, stream_id: &str, upload: Option<UploadBatch>) -> Result<IngestReport> {
        let stream = self.stream(stream_id)?;
        let mut upload = upload.ok_or(Error::MissingUpload)?;

        let incoming = upload.read_all()?;
        if incoming.is_empty() {
            return Err(Error::EmptyUpload);
        }

        let _guard = stream.lock.write().unwrap_or_else(PoisonError::into_inner);

        let state = StoreState::inspect(&stream.path).map_err(|e| Error::ReadFailure {
            path: stream.path.clone(),
            source: e,
        })?;
        let plan = append::plan_append(&state, &incoming, self.options.header_check)?;

        let mut report = IngestReport {
            stream: stream_id.to_string(),
            created: plan.creates,
            bytes_written: 0,
            rows_appended: plan.rows,
        };

        if plan.is_noop() {
            debug!("Nothing to append for {}", stream_id);
            return Ok(report);
        }

        match self.options.durability {
            Durability::Append => append_in_place(&stream.path, &state, &plan.bytes)?,
            Durability::Atomic => replace_atomically(&stream.path, &state, &plan.bytes)?,
        }
        report.bytes_written = plan.bytes.len() as u64;

        if plan.creates {
            info!(
                "Created store for {} with {} rows at {}",
                stream_id,
                plan.rows,
                stream.path.display()
            );
        } else {
            info!("Appended {} rows to {}", plan.rows, stream.path.display());
        }

        Ok(report)
    }
}

fn persist_failure(path: &Path) -> impl Fn(io::Error) -> Error + '_ {
    move |e| Error::PersistFailure {
        path: path.to_path_buf(),
        source: e,
    }
}

/// Append `bytes` to the store file, rolling back a partial write.
fn append_in_place(path: &Path, state: &StoreState, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(persist_failure(path))?;

    if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_data()) {
        let rollback = if state.exists {
            file.set_len(state.len)
        } else {
            drop(file);
            std::fs::remove_file(path)
        };
        match rollback {
            Ok(()) => warn!("Rolled back failed append to {}", path.display()),
            Err(re) => warn!("Failed to roll back {}: {}", path.display(), re),
        }
        return Err(persist_failure(path)(e));
    }

    if !state.exists {
        sync_parent(path).map_err(persist_failure(path))?;
    }
    Ok(())
}

/// Copy the store plus `bytes` into a temporary file and rename it into place.
fn replace_atomically(path: &Path, state: &StoreState, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".sensorhub-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(persist_failure(path))?;

    if state.exists {
        let mut current = File::open(path).map_err(|e| Error::ReadFailure {
            path: path.to_path_buf(),
            source: e,
        })?;
        io::copy(&mut current, tmp.as_file_mut()).map_err(persist_failure(path))?;
    }
    tmp.write_all(bytes).map_err(persist_failure(path))?;
    tmp.as_file().sync_all().map_err(persist_failure(path))?;

    tmp.persist(path)
        .map_err(|e| persist_failure(path)(e.error))?;
    sync_parent(path).map_err(persist_failure(path))?;
    debug!("Replaced {} atomically", path.display());
    Ok(())
}

/// Make a new directory entry durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

// Retrieval
impl Store {
    /// Read a stream's store and return its records.
    ///
    /// The file is read as one snapshot under the stream's shared lock; the
    /// records are parsed lazily afterwards.
    pub fn retrieve(&self, stream_id: &str) -> Result<Records> {
        let stream = self.stream(stream_id)?;

        let content = {
            let _guard = stream.lock.read().unwrap_or_else(PoisonError::into_inner);
            match std::fs::read(&stream.path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::StoreNotFound(stream_id.to_string()));
                }
                Err(e) => {
                    return Err(Error::ReadFailure {
                        path: stream.path.clone(),
                        source: e,
                    });
                }
            }
        };

        debug!("Read {} bytes from {}", content.len(), stream.path.display());
        Records::from_bytes(content, self.options.row_mode)
    }

    /// Raw store content, or `None` if nothing has been ingested.
    pub fn read_raw(&self, stream_id: &str) -> Result<Option<Vec<u8>>> {
        let stream = self.stream(stream_id)?;
        let _guard = stream.lock.read().unwrap_or_else(PoisonError::into_inner);
        match std::fs::read(&stream.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::ReadFailure {
                path: stream.path.clone(),
                source: e,
            }),
        }
    }
}
