use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{gcp::GoogleCloudStorageBuilder, ObjectStore};

use crate::{
    blob::BlobObjectStore,
    codec::{KeyPathCodec, StoreKey},
    config::{GcsConfig, PathSpec},
    error::StoreError,
    StoreBackend, StoreValue,
};

/// Store backend over a GCS bucket; same contract and copy-then-delete move
/// semantics as the S3 variant.
pub struct GcsStoreBackend {
    inner: BlobObjectStore,
    bucket: String,
}

impl GcsStoreBackend {
    pub fn new(
        client: Arc<dyn ObjectStore>,
        config: &GcsConfig,
        path_spec: &PathSpec,
    ) -> Result<Self, StoreError> {
        let codec = KeyPathCodec::for_object_store(path_spec)?;
        Ok(GcsStoreBackend {
            inner: BlobObjectStore::new(
                client,
                config.prefix.clone(),
                config.content_type.clone(),
                codec,
            ),
            bucket: config.bucket.clone(),
        })
    }

    /// Builds the GCS client from ambient Google Cloud environment
    /// credentials.
    pub fn from_env(config: &GcsConfig, path_spec: &PathSpec) -> Result<Self, StoreError> {
        let client = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .build()?;
        Self::new(Arc::new(client), config, path_spec)
    }

    pub fn with_ignored_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = StoreKey>,
    {
        self.inner.set_ignored_keys(keys);
        self
    }
}

#[async_trait]
impl StoreBackend for GcsStoreBackend {
    async fn get(&self, key: &StoreKey) -> Result<Bytes, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &StoreKey, value: StoreValue) -> Result<String, StoreError> {
        self.inner.set(key, value).await
    }

    async fn move_key(&self, source: &StoreKey, dest: &StoreKey) -> Result<bool, StoreError> {
        self.inner.move_key(source, dest).await
    }

    async fn list_keys(&self, prefix: &[String]) -> Result<Vec<StoreKey>, StoreError> {
        self.inner.list_keys(prefix).await
    }

    async fn remove_key(&self, key: &StoreKey) -> Result<bool, StoreError> {
        self.inner.remove_key(key).await
    }

    async fn has_key(&self, key: &StoreKey) -> Result<bool, StoreError> {
        self.inner.has_key(key).await
    }

    fn get_url_for_key(
        &self,
        key: &StoreKey,
        _protocol: Option<&str>,
    ) -> Result<String, StoreError> {
        let path = self.inner.object_key(key)?;
        Ok(format!(
            "https://storage.googleapis.com/{}/{}",
            self.bucket, path
        ))
    }

    fn codec(&self) -> &KeyPathCodec {
        self.inner.codec()
    }
}
