//! File-backed, append-only stores for sensor CSV uploads.
//!
//! Each configured sensor stream (particulate matter, CO gas, VOC, ...) owns
//! one flat CSV file. Uploaded batches are appended to it with a single header
//! line kept at the top, and the file can be read back as structured records.
//!
//! # Features
//!
//! - One store file per stream, resolved under a storage root
//! - Header de-duplication across repeated uploads
//! - Per-stream locking: writers are exclusive, readers take snapshots
//! - Rollback of torn appends, or temp-file-and-rename persistence
//! - Lazy conversion of store content into ordered column/value records
//!
//! # Example
//!
//! ```no_run
//! use sensorhub_store::{Store, StoreOptions, StreamSpec, UploadBatch};
//!
//! let store = Store::open("uploads", &StreamSpec::defaults(), StoreOptions::default())?;
//!
//! let batch = UploadBatch::from_bytes_in(store.root(), b"ts,val\n1,10\n")?;
//! store.ingest("pms", Some(batch))?;
//!
//! for record in store.retrieve("pms")? {
//!     let record = record?;
//!     println!("{:?}", record.get("val"));
//! }
//! # Ok::<(), sensorhub_store::Error>(())
//! ```

mod append;
mod error;
mod records;
mod store;
mod stream;
mod upload;

pub use append::{AppendPlan, StoreState, plan_append};
pub use error::{Error, Result};
pub use records::{Record, Records, RowMode};
pub use store::{Durability, IngestReport, Store, StoreOptions};
pub use stream::{MAX_STREAM_ID_LEN, StreamInfo, StreamSpec};
pub use upload::UploadBatch;

/// Default storage root following platform conventions.
///
/// - Linux: `~/.local/share/sensorhub/uploads`
/// - macOS: `~/Library/Application Support/sensorhub/uploads`
/// - Windows: `C:\Users\<user>\AppData\Local\sensorhub\uploads`
pub fn default_store_root() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("sensorhub")
        .join("uploads")
}
