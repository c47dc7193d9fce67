use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::CertError;

/// A PEM-encoded certificate chain and private key, as raw bytes.
#[derive(Debug, Clone)]
pub struct RawPair {
    pub certificate: Vec<u8>,
    pub key: Vec<u8>,
}

/// Loads certificate/key pairs by candidate key.
///
/// Loaders are probed with the candidate keys derived from a server name
/// (see [`candidate_keys`]); returning `None` means "no such entry, try the
/// next candidate", while an error means the backing store itself failed.
///
/// [`candidate_keys`]: crate::candidate_keys
#[async_trait]
pub trait CertificateLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<RawPair>, CertError>;
}

/// Loads `<key>.crt` / `<key>.key` pairs from a base directory.
pub struct FileLoader {
    base: PathBuf,
}

impl FileLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileLoader { base: base.into() }
    }
}

#[async_trait]
impl CertificateLoader for FileLoader {
    async fn load(&self, key: &str) -> Result<Option<RawPair>, CertError> {
        let cert_path = self.base.join(format!("{key}.crt"));
        let key_path = self.base.join(format!("{key}.key"));

        let certificate = match tokio::fs::read(&cert_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let private_key = match tokio::fs::read(&key_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(RawPair {
            certificate,
            key: private_key,
        }))
    }
}

/// A key-value store holding certificate entries.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the raw value stored under `key`, or `None` when absent.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, CertError>;
}

/// The stored value format: a JSON object with PEM `certificate` and `key`
/// fields.
#[derive(Debug, Deserialize)]
struct KvEntry {
    certificate: String,
    key: String,
}

/// Loads certificate pairs from a [`KvStore`].
pub struct KvLoader {
    store: Arc<dyn KvStore>,
}

impl KvLoader {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        KvLoader { store }
    }
}

#[async_trait]
impl CertificateLoader for KvLoader {
    async fn load(&self, key: &str) -> Result<Option<RawPair>, CertError> {
        let Some(raw) = self.store.fetch(key).await? else {
            return Ok(None);
        };

        let entry: KvEntry =
            serde_json::from_slice(&raw).map_err(|e| CertError::Store(e.to_string()))?;

        Ok(Some(RawPair {
            certificate: entry.certificate.into_bytes(),
            key: entry.key.into_bytes(),
        }))
    }
}

/// An in-memory key-value store, used in tests and development.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        MemoryKvStore::default()
    }

    pub fn insert(&self, key: &str, value: Vec<u8>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, CertError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }
}

/// A key-value store reached over plain HTTP: entries live at
/// `<base>/<key>`, a 404 means the entry is absent.
pub struct HttpKvStore {
    authority: String,
    base_path: String,
}

impl HttpKvStore {
    pub fn new(base: &str) -> Result<Self, CertError> {
        let url = Url::parse(base).map_err(|e| CertError::Store(e.to_string()))?;
        if url.scheme() != "http" {
            return Err(CertError::Store(format!(
                "unsupported certificate store scheme '{}'",
                url.scheme(),
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| CertError::Store("certificate store URL has no host".to_string()))?;
        let port = url.port().unwrap_or(80);

        Ok(HttpKvStore {
            authority: format!("{host}:{port}"),
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl KvStore for HttpKvStore {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, CertError> {
        let stream = TcpStream::connect(&self.authority)
            .await
            .map_err(|e| CertError::Store(e.to_string()))?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| CertError::Store(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                debug!(%error, "certificate store connection closed");
            }
        });

        let request = Request::get(format!("{}/{}", self.base_path, key))
            .header(http::header::HOST, self.authority.clone())
            .body(Empty::<Bytes>::new())
            .map_err(|e| CertError::Store(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| CertError::Store(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(|e| CertError::Store(e.to_string()))?
                    .to_bytes();
                Ok(Some(body.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(CertError::Store(format!(
                "certificate store returned {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_loader_reads_pairs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.com.crt"), b"CERT").unwrap();
        std::fs::write(dir.path().join("example.com.key"), b"KEY").unwrap();

        let loader = FileLoader::new(dir.path());

        let pair = loader.load("example.com").await.unwrap().unwrap();
        assert_eq!(pair.certificate, b"CERT");
        assert_eq!(pair.key, b"KEY");

        assert!(loader.load("missing.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_loader_requires_both_halves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lonely.com.crt"), b"CERT").unwrap();

        let loader = FileLoader::new(dir.path());
        assert!(loader.load("lonely.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn kv_loader_decodes_entries() {
        let store = Arc::new(MemoryKvStore::new());
        store.insert(
            "example.com",
            br#"{"certificate": "CERT", "key": "KEY"}"#.to_vec(),
        );

        let loader = KvLoader::new(store);

        let pair = loader.load("example.com").await.unwrap().unwrap();
        assert_eq!(pair.certificate, b"CERT");
        assert_eq!(pair.key, b"KEY");

        assert!(loader.load("missing.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn kv_loader_rejects_malformed_entries() {
        let store = Arc::new(MemoryKvStore::new());
        store.insert("example.com", b"not json".to_vec());

        let loader = KvLoader::new(store);
        assert!(loader.load("example.com").await.is_err());
    }

    #[test]
    fn http_store_requires_http_urls() {
        assert!(HttpKvStore::new("http://certs.internal:8000/certs").is_ok());
        assert!(HttpKvStore::new("redis://certs.internal").is_err());
        assert!(HttpKvStore::new("not a url").is_err());
    }
}
