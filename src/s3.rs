use std::{env, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, ObjectStore};

use crate::{
    blob::BlobObjectStore,
    codec::{KeyPathCodec, StoreKey},
    config::{PathSpec, S3Config},
    error::StoreError,
    StoreBackend, StoreValue,
};

/// Store backend over an S3 bucket. Object keys are always forward-slash
/// joined; `move_key` is copy-then-delete and not atomic.
pub struct S3StoreBackend {
    inner: BlobObjectStore,
    bucket: String,
    region: String,
}

impl S3StoreBackend {
    /// Backend over an injected client; used directly in tests with an
    /// in-memory object store.
    pub fn new(
        client: Arc<dyn ObjectStore>,
        config: &S3Config,
        path_spec: &PathSpec,
    ) -> Result<Self, StoreError> {
        let codec = KeyPathCodec::for_object_store(path_spec)?;
        Ok(S3StoreBackend {
            inner: BlobObjectStore::new(
                client,
                config.prefix.clone(),
                config.content_type.clone(),
                codec,
            ),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
        })
    }

    /// Builds the S3 client from ambient AWS environment credentials.
    pub fn from_env(config: &S3Config, path_spec: &PathSpec) -> Result<Self, StoreError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
        if !config.region.is_empty() {
            builder = builder.with_region(&config.region);
        }
        // For supporting localstack/minio for testing
        if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
            builder = builder.with_endpoint(endpoint.clone());
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        let client = builder.build()?;
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
impl StoreBackend for S3StoreBackend {
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
        let host = if self.region.is_empty() {
            "s3".to_string()
        } else {
            format!("s3-{}", self.region)
        };
        let path = self.inner.codec().encode(key)?;
        if self.inner.store_prefix().is_empty() {
            Ok(format!(
                "https://{}.amazonaws.com/{}/{}",
                host, self.bucket, path
            ))
        } else {
            Ok(format!(
                "https://{}.amazonaws.com/{}/{}/{}",
                host,
                self.bucket,
                self.inner.store_prefix(),
                path
            ))
        }
    }

    fn codec(&self) -> &KeyPathCodec {
        self.inner.codec()
    }
}

#[cfg(test)]
mod tests {
    use object_store::{memory::InMemory, path::Path};

    use super::*;

    fn store_with_client() -> (Arc<InMemory>, S3StoreBackend) {
        let client = Arc::new(InMemory::new());
        let config = S3Config {
            bucket: "demo".to_string(),
            region: "us-east-1".to_string(),
            prefix: "store".to_string(),
            content_type: Some("application/json".to_string()),
        };
        let path_spec = PathSpec {
            suffix: Some(".json".to_string()),
            ..Default::default()
        };
        let backend = S3StoreBackend::new(client.clone(), &config, &path_spec).unwrap();
        (client, backend)
    }

    #[tokio::test]
    async fn set_places_object_under_store_prefix() {
        let (client, store) = store_with_client();
        let key = StoreKey::from(["suites", "demo"]);
        let location = store.set(&key, "{}".into()).await.unwrap();
        assert_eq!(location, "store/suites/demo.json");
        client
            .head(&Path::from("store/suites/demo.json"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_set_has_round_trip() {
        let (_client, store) = store_with_client();
        let key = StoreKey::from(["suites", "demo"]);
        assert!(!store.has_key(&key).await.unwrap());
        let err = store.get(&key).await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));

        store.set(&key, "v1".into()).await.unwrap();
        store.set(&key, "v2".into()).await.unwrap();
        assert!(store.has_key(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from("v2"));
    }

    #[tokio::test]
    async fn move_key_copies_then_deletes() {
        let (_client, store) = store_with_client();
        let src = StoreKey::from(["runs", "old"]);
        let dst = StoreKey::from(["runs", "new"]);

        assert!(!store.move_key(&src, &dst).await.unwrap());

        store.set(&src, "payload".into()).await.unwrap();
        assert!(store.move_key(&src, &dst).await.unwrap());
        assert!(!store.has_key(&src).await.unwrap());
        assert_eq!(store.get(&dst).await.unwrap(), Bytes::from("payload"));
    }

    #[tokio::test]
    async fn remove_key_deletes_only_the_targeted_object() {
        let (_client, store) = store_with_client();
        let keep = StoreKey::from(["suites", "keep"]);
        let drop = StoreKey::from(["suites", "drop"]);
        store.set(&keep, "a".into()).await.unwrap();
        store.set(&drop, "b".into()).await.unwrap();

        assert!(store.remove_key(&drop).await.unwrap());
        assert!(!store.remove_key(&drop).await.unwrap());
        assert_eq!(store.list_keys(&[]).await.unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn list_keys_filters_foreign_objects_and_prefix() {
        let (client, store) = store_with_client();
        store
            .set(&StoreKey::from(["suites", "alpha"]), "a".into())
            .await
            .unwrap();
        store
            .set(&StoreKey::from(["results", "beta"]), "b".into())
            .await
            .unwrap();
        // Foreign objects: outside the store prefix, and failing the suffix
        // filter inside it.
        client
            .put(&Path::from("elsewhere/thing.json"), "x".into())
            .await
            .unwrap();
        client
            .put(&Path::from("store/README.txt"), "x".into())
            .await
            .unwrap();

        let mut keys = store.list_keys(&[]).await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                StoreKey::from(["results", "beta"]),
                StoreKey::from(["suites", "alpha"]),
            ]
        );

        let keys = store.list_keys(&["suites".to_string()]).await.unwrap();
        assert_eq!(keys, vec![StoreKey::from(["suites", "alpha"])]);
    }

    #[tokio::test]
    async fn templated_round_trip_through_object_store() {
        let client = Arc::new(InMemory::new());
        let config = S3Config {
            bucket: "demo".to_string(),
            region: String::new(),
            prefix: String::new(),
            content_type: None,
        };
        let path_spec = PathSpec {
            template: Some("a/{0}/{1}/b-{1}.txt".to_string()),
            ..Default::default()
        };
        let store = S3StoreBackend::new(client, &config, &path_spec).unwrap();
        let key = StoreKey::from(["x", "y"]);
        let location = store.set(&key, "v".into()).await.unwrap();
        assert_eq!(location, "a/x/y/b-y.txt");
        assert_eq!(store.list_keys(&[]).await.unwrap(), vec![key]);
    }

    #[test]
    fn url_is_region_aware() {
        let (_client, store) = store_with_client();
        let key = StoreKey::from(["suites", "demo"]);
        assert_eq!(
            store.get_url_for_key(&key, None).unwrap(),
            "https://s3-us-east-1.amazonaws.com/demo/store/suites/demo.json"
        );

        let config = S3Config {
            bucket: "demo".to_string(),
            region: String::new(),
            prefix: String::new(),
            content_type: None,
        };
        let store =
            S3StoreBackend::new(Arc::new(InMemory::new()), &config, &PathSpec::default()).unwrap();
        assert_eq!(
            store.get_url_for_key(&key, None).unwrap(),
            "https://s3.amazonaws.com/demo/suites/demo"
        );
    }
}
