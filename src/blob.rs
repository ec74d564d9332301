use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    path::Path, Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload,
};
use tracing::debug;

use crate::{
    codec::{KeyPathCodec, StoreKey},
    error::StoreError,
    metrics::{StoreMetrics, Timer},
    StoreValue,
};

/// The operations shared by every object-store backed variant; the physical
/// client is injected, so the core never touches a provider SDK directly.
pub(crate) struct BlobObjectStore {
    client: Arc<dyn ObjectStore>,
    store_prefix: String,
    content_type: Option<String>,
    codec: KeyPathCodec,
    ignored_keys: HashSet<StoreKey>,
    metrics: StoreMetrics,
}

fn missing_object(err: object_store::Error, path: &Path) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::ObjectNotFound {
            path: path.to_string(),
        },
        other => other.into(),
    }
}

impl BlobObjectStore {
    pub(crate) fn new(
        client: Arc<dyn ObjectStore>,
        store_prefix: String,
        content_type: Option<String>,
        codec: KeyPathCodec,
    ) -> Self {
        BlobObjectStore {
            client,
            store_prefix,
            content_type,
            codec,
            ignored_keys: HashSet::new(),
            metrics: StoreMetrics::new(),
        }
    }

    pub(crate) fn set_ignored_keys<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = StoreKey>,
    {
        self.ignored_keys = keys.into_iter().collect();
    }

    pub(crate) fn codec(&self) -> &KeyPathCodec {
        &self.codec
    }

    pub(crate) fn store_prefix(&self) -> &str {
        &self.store_prefix
    }

    /// Full object key: store prefix joined with the codec-encoded key.
    pub(crate) fn object_key(&self, key: &StoreKey) -> Result<String, StoreError> {
        let encoded = self.codec.encode(key)?;
        Ok(if self.store_prefix.is_empty() {
            encoded
        } else {
            format!("{}/{}", self.store_prefix, encoded)
        })
    }

    fn object_path(&self, key: &StoreKey) -> Result<Path, StoreError> {
        Ok(Path::from(self.object_key(key)?))
    }

    pub(crate) async fn get(&self, key: &StoreKey) -> Result<Bytes, StoreError> {
        let _timer = Timer::start(&self.metrics.reads);
        let path = self.object_path(key)?;
        let result = self
            .client
            .get(&path)
            .await
            .map_err(|err| missing_object(err, &path))?;
        Ok(result.bytes().await?)
    }

    pub(crate) async fn set(&self, key: &StoreKey, value: StoreValue) -> Result<String, StoreError> {
        let _timer = Timer::start(&self.metrics.writes);
        let path = self.object_path(key)?;
        let payload = PutPayload::from(value.into_bytes());
        match &self.content_type {
            Some(content_type) => {
                let attributes = Attributes::from_iter([(
                    Attribute::ContentType,
                    AttributeValue::from(content_type.clone()),
                )]);
                let opts = PutOptions {
                    attributes,
                    ..Default::default()
                };
                self.client.put_opts(&path, payload, opts).await?;
            }
            None => {
                self.client.put(&path, payload).await?;
            }
        }
        Ok(path.to_string())
    }

    /// Copy then delete; a crash in between can leave the source present.
    pub(crate) async fn move_key(
        &self,
        source: &StoreKey,
        dest: &StoreKey,
    ) -> Result<bool, StoreError> {
        let _timer = Timer::start(&self.metrics.writes);
        let source_path = self.object_path(source)?;
        let dest_path = self.object_path(dest)?;
        match self.client.copy(&source_path, &dest_path).await {
            Ok(()) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        self.client.delete(&source_path).await?;
        Ok(true)
    }

    pub(crate) async fn list_keys(&self, prefix: &[String]) -> Result<Vec<StoreKey>, StoreError> {
        let _timer = Timer::start(&self.metrics.lists);
        let list_prefix =
            (!self.store_prefix.is_empty()).then(|| Path::from(self.store_prefix.as_str()));
        let stripped = if self.store_prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.store_prefix)
        };

        let mut keys = Vec::new();
        let mut stream = self.client.list(list_prefix.as_ref());
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let location = meta.location.to_string();
            let Some(object_key) = location.strip_prefix(stripped.as_str()) else {
                continue;
            };

            if let Some(path_prefix) = self.codec.prefix() {
                if !object_key.starts_with(path_prefix) {
                    continue;
                }
            }
            if let Some(path_suffix) = self.codec.suffix() {
                if !object_key.ends_with(path_suffix) {
                    continue;
                }
            }

            let Some(key) = self.codec.decode(object_key)? else {
                continue;
            };
            if !prefix.is_empty() && !key.starts_with(prefix) {
                continue;
            }
            if self.ignored_keys.contains(&key) {
                continue;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Deletes only the targeted object.
    pub(crate) async fn remove_key(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let _timer = Timer::start(&self.metrics.deletes);
        let path = self.object_path(key)?;
        match self.client.head(&path).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        self.client.delete(&path).await?;
        debug!(path = %path, "removed object");
        Ok(true)
    }

    pub(crate) async fn has_key(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        match self.client.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
