//! HTTP upload and query service for sensor CSV streams.
//!
//! Sensor loggers post batches of readings as CSV files; the service appends
//! them to one store file per stream and serves the accumulated rows as JSON.
//!
//! # REST API Endpoints
//!
//! - `POST /{stream}/data` - Upload a CSV batch (multipart field `file`)
//! - `GET /{stream}/data/json` - All rows of a stream as JSON objects
//! - `GET /api/health` - Service health check
//! - `GET /api/streams` - Configured streams and their store files
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/sensorhub/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:5000"
//! cors_origins = ["http://localhost:3000"]
//!
//! [storage]
//! root = "~/.local/share/sensorhub/uploads"
//! durability = "append"
//!
//! [[streams]]
//! id = "pms"
//! file = "pmsdata.csv"
//! ```
//!
//! Without a `[[streams]]` table the `pms`, `mq7` and `sgp40` streams are
//! served.

pub mod api;
pub mod client;
pub mod config;
pub mod state;

pub use client::{ClientError, UploadClient};
pub use config::{Config, ConfigError, ServerConfig, StorageConfig, ValidationError};
pub use state::AppState;
