//! Server configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sensorhub_store::{Durability, RowMode, StoreOptions, StreamSpec};
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Sensor streams accepting uploads.
    pub streams: Vec<StreamSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            streams: StreamSpec::defaults(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - CORS origins are http(s) URLs and the upload limit is non-zero
    /// - Storage root is not empty
    /// - At least one stream is configured
    /// - Stream ids and file names are well-formed and unique
    ///
    /// # Example
    ///
    /// ```
    /// use sensorhub_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());

        if self.streams.is_empty() {
            errors.push(ValidationError {
                field: "streams".to_string(),
                message: "at least one stream must be configured".to_string(),
            });
        }

        let mut seen_ids = HashSet::new();
        let mut seen_files = HashSet::new();
        for (i, stream) in self.streams.iter().enumerate() {
            let prefix = format!("streams[{}]", i);

            if let Err(message) = stream.check() {
                errors.push(ValidationError {
                    field: prefix.clone(),
                    message,
                });
            }

            if !seen_ids.insert(stream.id.to_lowercase()) {
                errors.push(ValidationError {
                    field: format!("{}.id", prefix),
                    message: format!("duplicate stream id '{}'", stream.id),
                });
            }
            if !seen_files.insert(stream.file.to_lowercase()) {
                errors.push(ValidationError {
                    field: format!("{}.file", prefix),
                    message: format!("store file '{}' is shared with another stream", stream.file),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind: String,
    /// Origins allowed by CORS. An empty list allows any origin.
    pub cors_origins: Vec<String>,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
}

/// Default upload limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            // Check for valid host:port format
            let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
            if parts.len() != 2 {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                });
            } else {
                let port_str = parts[0];
                match port_str.parse::<u16>() {
                    Ok(0) => {
                        errors.push(ValidationError {
                            field: "server.bind".to_string(),
                            message: "port cannot be 0".to_string(),
                        });
                    }
                    Err(_) => {
                        errors.push(ValidationError {
                            field: "server.bind".to_string(),
                            message: format!(
                                "invalid port '{}': must be a number 1-65535",
                                port_str
                            ),
                        });
                    }
                    Ok(_) => {}
                }
            }
        }

        for (i, origin) in self.cors_origins.iter().enumerate() {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                errors.push(ValidationError {
                    field: format!("server.cors_origins[{}]", i),
                    message: format!("origin '{}' must start with http:// or https://", origin),
                });
            }
        }

        if self.max_upload_bytes == 0 {
            errors.push(ValidationError {
                field: "server.max_upload_bytes".to_string(),
                message: "upload limit cannot be 0".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one store file per stream.
    pub root: PathBuf,
    /// Directory for temporary uploads (defaults to `<root>/tmp`).
    pub upload_dir: Option<PathBuf>,
    /// How appends are persisted.
    pub durability: Durability,
    /// Fail retrieval on rows whose field count differs from the header.
    pub strict_rows: bool,
    /// Reject uploads whose header differs from the stored header.
    pub header_check: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: sensorhub_store::default_store_root(),
            upload_dir: None,
            durability: Durability::default(),
            strict_rows: false,
            header_check: false,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.root.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.root".to_string(),
                message: "storage root cannot be empty".to_string(),
            });
        }

        if let Some(dir) = &self.upload_dir
            && dir.as_os_str().is_empty()
        {
            errors.push(ValidationError {
                field: "storage.upload_dir".to_string(),
                message: "upload directory cannot be empty string (omit it instead)".to_string(),
            });
        }

        errors
    }

    /// Directory temporary uploads are spooled to.
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| self.root.join("tmp"))
    }

    /// Store options derived from these settings.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            durability: self.durability,
            row_mode: if self.strict_rows {
                RowMode::Strict
            } else {
                RowMode::Lenient
            },
            header_check: self.header_check,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `streams[0].id`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorhub")
        .join("server.toml")
}
