//! Drives a live server over TCP with the upload client.

use std::path::Path;
use std::sync::Arc;

use sensorhub_service::client::DEFAULT_UPLOAD_TIMEOUT;
use sensorhub_service::{AppState, ClientError, Config, StorageConfig, UploadClient, api};
use sensorhub_store::Store;

async fn spawn_server(root: &Path) -> (String, Arc<AppState>) {
    let config = Config {
        storage: StorageConfig {
            root: root.to_path_buf(),
            ..StorageConfig::default()
        },
        ..Config::default()
    };
    let store = Store::open(root, &config.streams, config.storage.store_options()).unwrap();
    std::fs::create_dir_all(config.storage.upload_dir()).unwrap();
    let state = AppState::new(store, config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::app(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

#[tokio::test]
async fn test_upload_file_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (url, state) = spawn_server(dir.path()).await;
    let client = UploadClient::new(url, DEFAULT_UPLOAD_TIMEOUT).unwrap();

    // Loggers rewrite their local file with a header and the latest batch each time
    let local = dir.path().join("sgp40_data.csv");
    std::fs::write(
        &local,
        "Timestamp,VOC Index,VOC Category\r\n2024-11-02 10:00:01,104,Good\r\n",
    )
    .unwrap();
    let reply = client.upload_file("sgp40", &local).await.unwrap();
    assert_eq!(reply, api::UPLOAD_OK);

    std::fs::write(
        &local,
        "Timestamp,VOC Index,VOC Category\r\n2024-11-02 10:00:02,180,Moderate\r\n",
    )
    .unwrap();
    client.upload_file("sgp40", &local).await.unwrap();

    let stored = state.store.read_raw("sgp40").unwrap().unwrap();
    assert_eq!(
        String::from_utf8(stored).unwrap(),
        "Timestamp,VOC Index,VOC Category\r\n\
         2024-11-02 10:00:01,104,Good\r\n\
         2024-11-02 10:00:02,180,Moderate\r\n"
    );
}

#[tokio::test]
async fn test_upload_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let (url, _state) = spawn_server(dir.path()).await;
    let client = UploadClient::new(url, DEFAULT_UPLOAD_TIMEOUT).unwrap();

    let result = client
        .upload_bytes("bme280", "data.csv".to_string(), b"ts,val\n1,2\n".to_vec())
        .await;
    match result {
        Err(ClientError::Rejected { status, message }) => {
            assert_eq!(status, 404);
            assert!(message.contains("bme280"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let result = client
        .upload_bytes("pms", "data.csv".to_string(), Vec::new())
        .await;
    assert!(matches!(
        result,
        Err(ClientError::Rejected { status: 400, .. })
    ));
}
