use occipital::{BuiltinModel, ModelError, ModelInfo, ModelManager};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const MODEL_BYTES: &[u8] = b"not really an onnx graph, but bytes are bytes";

fn sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Serves `body` with `status` to each of the next `requests` connections.
async fn serve(status: &'static str, body: &'static [u8], requests: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/mobilenet.onnx", listener.local_addr().unwrap());
    tokio::spawn(async move {
        for _ in 0..requests {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            stream.shutdown().await.ok();
        }
    });
    url
}

fn info(url: String, hash: Option<String>) -> ModelInfo {
    ModelInfo {
        name: "mobilenet-test".to_string(),
        model_url: url,
        model_hash: hash,
    }
}

#[tokio::test]
async fn test_model_download() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let info = info(serve("200 OK", MODEL_BYTES, 1).await, Some(sha256(MODEL_BYTES)));

    assert!(!manager.is_model_downloaded(&info.name));
    let path = manager.download_model(&info).await?;
    assert!(manager.is_model_downloaded(&info.name));
    assert!(manager.verify_model(&info)?);
    assert_eq!(std::fs::read(&path)?, MODEL_BYTES);

    // The server only answers once; a verified cached copy must not be fetched again.
    let again = manager.ensure_model_downloaded(&info).await?;
    assert_eq!(again, path);
    assert_eq!(manager.require_model(&info.name)?, path);
    Ok(())
}

#[tokio::test]
async fn test_hash_mismatch_discards_download() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let info = info(serve("200 OK", MODEL_BYTES, 1).await, Some("00".repeat(32)));

    let err = manager.download_model(&info).await.unwrap_err();
    assert!(matches!(err, ModelError::HashMismatch { .. }));
    assert!(!manager.is_model_downloaded(&info.name));
    Ok(())
}

#[tokio::test]
async fn test_unpinned_hash_is_accepted() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let info = info(serve("200 OK", MODEL_BYTES, 1).await, None);

    manager.download_model(&info).await?;
    assert!(manager.verify_model(&info)?);
    Ok(())
}

#[tokio::test]
async fn test_http_error_status() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let info = info(serve("404 Not Found", b"missing", 1).await, None);

    let err = manager.download_model(&info).await.unwrap_err();
    assert!(matches!(err, ModelError::HttpStatus { status: 404, .. }));
    assert!(matches!(manager.require_model(&info.name), Err(ModelError::NotDownloaded(_))));
    Ok(())
}

#[tokio::test]
async fn test_remove_download() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let info = info(serve("200 OK", MODEL_BYTES, 1).await, None);

    manager.download_model(&info).await?;
    manager.remove_download(&info.name)?;
    assert!(!manager.is_model_downloaded(&info.name));
    assert!(!manager.verify_model(&info)?);
    Ok(())
}

#[test]
fn test_builtin_model_paths() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let info = BuiltinModel::MobileNetV2.get_model_info();
    assert!(manager.get_model_path(&info.name).ends_with("mobilenetv2/model.onnx"));
    assert!(info.model_url.ends_with(".onnx"));
    Ok(())
}
