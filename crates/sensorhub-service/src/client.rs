//! HTTP client for posting CSV batches to a running service.
//!
//! Sensor loggers write readings to a local CSV file and periodically push it
//! to the service. [`UploadClient`] performs that push the same way the
//! service expects it: a multipart request with the file in the `file` field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use crate::api::UPLOAD_FIELD;

/// Default request timeout for uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Client that uploads CSV batches to `POST {base_url}/{stream}/data`.
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    base_url: String,
}

impl UploadClient {
    /// Create a client for the service at `base_url` (e.g. `http://localhost:5000`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// URL that batches for `stream` are posted to.
    pub fn upload_url(&self, stream: &str) -> String {
        format!("{}/{}/data", self.base_url, stream)
    }

    /// Upload the CSV file at `path` to `stream`.
    pub async fn upload_file(&self, stream: &str, path: &Path) -> Result<String, ClientError> {
        let content = tokio::fs::read(path).await.map_err(|e| ClientError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data.csv".to_string());
        self.upload_bytes(stream, file_name, content).await
    }

    /// Upload an in-memory CSV batch to `stream`, returning the server's reply.
    pub async fn upload_bytes(
        &self,
        stream: &str,
        file_name: String,
        content: Vec<u8>,
    ) -> Result<String, ClientError> {
        let url = self.upload_url(stream);
        let size = content.len();
        let part = Part::bytes(content)
            .file_name(file_name)
            .mime_str("text/csv")?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        debug!("Posting {} bytes to {}", size, url);
        let response = self.http.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        info!("Uploaded {} bytes to {}", size, url);
        Ok(body)
    }
}

/// Pull the message out of a `{"error": ...}` body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_url() {
        let client = UploadClient::new("http://localhost:5000/", DEFAULT_UPLOAD_TIMEOUT).unwrap();
        assert_eq!(client.upload_url("pms"), "http://localhost:5000/pms/data");
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"error":"No file uploaded."}"#), "No file uploaded.");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(r#"{"detail":1}"#), r#"{"detail":1}"#);
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let client = UploadClient::new("http://localhost:5000", DEFAULT_UPLOAD_TIMEOUT).unwrap();
        let result = client
            .upload_file("pms", Path::new("/nonexistent/pms5003_data.csv"))
            .await;
        assert!(matches!(result, Err(ClientError::Read { .. })));
    }
}
