//! A tuple-keyed, pluggable object store: byte/string payloads addressed by
//! a tuple of string components, mapped to backend paths by a reversible
//! template codec, and stored on a local directory tree or a cloud object
//! store behind one contract.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

pub mod codec;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod gcs;
pub mod metrics;
pub mod s3;

mod blob;

pub use codec::{KeyPathCodec, StoreKey};
pub use config::{FilesystemConfig, GcsConfig, PathSpec, S3Config, TupleStoreConfig};
pub use error::StoreError;
pub use filesystem::FilesystemStoreBackend;
pub use gcs::GcsStoreBackend;
pub use s3::S3StoreBackend;

/// A text or byte payload. The store is content-agnostic; text is persisted
/// as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Text(String),
    Bytes(Bytes),
}

impl StoreValue {
    pub fn into_bytes(self) -> Bytes {
        match self {
            StoreValue::Text(text) => Bytes::from(text),
            StoreValue::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StoreValue::Text(text) => text.len(),
            StoreValue::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for StoreValue {
    fn from(text: String) -> Self {
        StoreValue::Text(text)
    }
}

impl From<&str> for StoreValue {
    fn from(text: &str) -> Self {
        StoreValue::Text(text.to_string())
    }
}

impl From<Bytes> for StoreValue {
    fn from(bytes: Bytes) -> Self {
        StoreValue::Bytes(bytes)
    }
}

impl From<Vec<u8>> for StoreValue {
    fn from(bytes: Vec<u8>) -> Self {
        StoreValue::Bytes(Bytes::from(bytes))
    }
}

/// The store contract every physical backend implements. Key-to-path
/// translation is delegated to the backend's [`KeyPathCodec`].
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fails with [`StoreError::ObjectNotFound`] when the key is absent.
    async fn get(&self, key: &StoreKey) -> Result<Bytes, StoreError>;

    /// UTF-8 view of [`StoreBackend::get`]; non-text payloads fail with
    /// [`StoreError::InvalidValueType`].
    async fn get_text(&self, key: &StoreKey) -> Result<String, StoreError> {
        let bytes = self.get(key).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Writes the full value, creating intermediate containers and silently
    /// overwriting. Returns the storage location.
    async fn set(&self, key: &StoreKey, value: StoreValue) -> Result<String, StoreError>;

    /// Returns `false` and leaves storage unchanged when the source is
    /// absent. Atomic only where the medium provides it (filesystem rename);
    /// blob stores copy then delete.
    async fn move_key(&self, source: &StoreKey, dest: &StoreKey) -> Result<bool, StoreError>;

    /// Enumerates decodable objects under an optional key prefix. Paths the
    /// codec cannot decode and ignored keys are silently skipped.
    async fn list_keys(&self, prefix: &[String]) -> Result<Vec<StoreKey>, StoreError>;

    /// Returns `true` iff something was deleted.
    async fn remove_key(&self, key: &StoreKey) -> Result<bool, StoreError>;

    async fn has_key(&self, key: &StoreKey) -> Result<bool, StoreError>;

    /// Builds a locator string without checking existence.
    fn get_url_for_key(&self, key: &StoreKey, protocol: Option<&str>)
        -> Result<String, StoreError>;

    fn codec(&self) -> &KeyPathCodec;
}

/// Builds the backend variant selected by the configuration.
pub fn build_store_backend(config: &TupleStoreConfig) -> anyhow::Result<Arc<dyn StoreBackend>> {
    config.validate()?;
    let ignored_keys: Vec<StoreKey> = config
        .ignored_keys
        .iter()
        .cloned()
        .map(StoreKey::from)
        .collect();

    if let Some(fs) = &config.filesystem {
        let backend =
            FilesystemStoreBackend::new(fs, &config.path)?.with_ignored_keys(ignored_keys);
        info!(base_directory = %fs.base_directory, "using filesystem store backend");
        return Ok(Arc::new(backend));
    }
    if let Some(s3) = &config.s3 {
        let backend = S3StoreBackend::from_env(s3, &config.path)?.with_ignored_keys(ignored_keys);
        info!(bucket = %s3.bucket, "using s3 store backend");
        return Ok(Arc::new(backend));
    }
    if let Some(gcs) = &config.gcs {
        let backend =
            GcsStoreBackend::from_env(gcs, &config.path)?.with_ignored_keys(ignored_keys);
        info!(bucket = %gcs.bucket, "using gcs store backend");
        return Ok(Arc::new(backend));
    }
    Err(anyhow::anyhow!("no storage backend configured"))
}
