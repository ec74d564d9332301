use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    codec::{KeyPathCodec, StoreKey},
    config::{FilesystemConfig, PathSpec},
    error::StoreError,
    metrics::{StoreMetrics, Timer},
    StoreBackend, StoreValue,
};

/// Store backend rooted at a local directory tree.
///
/// Deleting the last file of a directory chain removes the now-empty
/// ancestor directories up to, but not including, the base directory.
#[derive(Debug)]
pub struct FilesystemStoreBackend {
    full_base_directory: PathBuf,
    codec: KeyPathCodec,
    ignored_keys: HashSet<StoreKey>,
    metrics: StoreMetrics,
}

impl FilesystemStoreBackend {
    /// A relative `base_directory` is resolved against an absolute
    /// `root_directory`; the parent of the base directory is created, the
    /// base directory itself need not pre-exist.
    pub fn new(config: &FilesystemConfig, path_spec: &PathSpec) -> Result<Self, StoreError> {
        let codec = KeyPathCodec::for_filesystem(path_spec)?;

        let base = Path::new(&config.base_directory);
        let full_base_directory = if base.is_absolute() {
            base.to_path_buf()
        } else {
            match config.root_directory.as_deref() {
                None => {
                    return Err(StoreError::Initialization(
                        "base_directory must be an absolute path when root_directory is not set"
                            .to_string(),
                    ))
                }
                Some(root) if !Path::new(root).is_absolute() => {
                    return Err(StoreError::Initialization(format!(
                        "root_directory must be an absolute path, got {:?}",
                        root
                    )))
                }
                Some(root) => Path::new(root).join(base),
            }
        };

        if let Some(parent) = full_base_directory.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(base_directory = %full_base_directory.display(), "initialized filesystem store backend");

        Ok(FilesystemStoreBackend {
            full_base_directory,
            codec,
            ignored_keys: HashSet::new(),
            metrics: StoreMetrics::new(),
        })
    }

    pub fn with_ignored_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = StoreKey>,
    {
        self.ignored_keys = keys.into_iter().collect();
        self
    }

    pub fn base_directory(&self) -> &Path {
        &self.full_base_directory
    }

    fn filepath_for(&self, key: &StoreKey) -> Result<PathBuf, StoreError> {
        Ok(self.full_base_directory.join(self.codec.encode(key)?))
    }

    /// Best-effort removal of empty directories between `start` and the base
    /// directory, exclusive of the base directory itself.
    async fn remove_empty_ancestors(&self, start: &Path) {
        let mut current = start;
        while current != self.full_base_directory && current.starts_with(&self.full_base_directory)
        {
            match tokio::fs::read_dir(current).await {
                Ok(mut entries) => match entries.next_entry().await {
                    Ok(Some(_)) => break,
                    Ok(None) => {}
                    Err(_) => break,
                },
                Err(_) => break,
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    async fn walk_files(&self, start: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let mut stack = vec![start.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl StoreBackend for FilesystemStoreBackend {
    async fn get(&self, key: &StoreKey) -> Result<Bytes, StoreError> {
        let _timer = Timer::start(&self.metrics.reads);
        let filepath = self.filepath_for(key)?;
        match tokio::fs::read(&filepath).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                path: filepath.display().to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &StoreKey, value: StoreValue) -> Result<String, StoreError> {
        let _timer = Timer::start(&self.metrics.writes);
        let filepath = self.filepath_for(key)?;
        if let Some(parent) = filepath.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&filepath, value.into_bytes()).await?;
        Ok(filepath.display().to_string())
    }

    async fn move_key(&self, source: &StoreKey, dest: &StoreKey) -> Result<bool, StoreError> {
        let _timer = Timer::start(&self.metrics.writes);
        let source_path = self.filepath_for(source)?;
        let dest_path = self.filepath_for(dest)?;

        match tokio::fs::metadata(&source_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source_path, &dest_path).await?;
        Ok(true)
    }

    async fn list_keys(&self, prefix: &[String]) -> Result<Vec<StoreKey>, StoreError> {
        let _timer = Timer::start(&self.metrics.lists);
        let mut start = self.full_base_directory.clone();
        for component in prefix {
            start.push(component);
        }

        let mut keys = Vec::new();
        for file in self.walk_files(&start).await? {
            let Ok(relative) = file.strip_prefix(&self.full_base_directory) else {
                continue;
            };
            let Some(filepath) = relative.to_str() else {
                warn!(path = %relative.display(), "skipping non-unicode path");
                continue;
            };

            if let Some(path_prefix) = self.codec.prefix() {
                if !filepath.starts_with(path_prefix) {
                    continue;
                }
            }
            if let Some(path_suffix) = self.codec.suffix() {
                if !filepath.ends_with(path_suffix) {
                    continue;
                }
            }

            if let Some(key) = self.codec.decode(filepath)? {
                if !self.ignored_keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    async fn remove_key(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let _timer = Timer::start(&self.metrics.deletes);
        let filepath = self.filepath_for(key)?;
        match tokio::fs::remove_file(&filepath).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        debug!(path = %filepath.display(), "removed object");
        if let Some(parent) = filepath.parent() {
            self.remove_empty_ancestors(parent).await;
        }
        Ok(true)
    }

    async fn has_key(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let filepath = self.filepath_for(key)?;
        match tokio::fs::metadata(&filepath).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn get_url_for_key(
        &self,
        key: &StoreKey,
        protocol: Option<&str>,
    ) -> Result<String, StoreError> {
        let filepath = self.filepath_for(key)?;
        let protocol = protocol.unwrap_or("file:");
        Ok(format!("{}//{}", protocol, filepath.display()))
    }

    fn codec(&self) -> &KeyPathCodec {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn backend(temp_dir: &TempDir, path_spec: PathSpec) -> FilesystemStoreBackend {
        let config = FilesystemConfig {
            base_directory: "store".to_string(),
            root_directory: Some(temp_dir.path().to_str().unwrap().to_string()),
        };
        FilesystemStoreBackend::new(&config, &path_spec).unwrap()
    }

    #[tokio::test]
    async fn set_get_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        let key = StoreKey::from(["suites", "demo"]);

        store.set(&key, "v1".into()).await.unwrap();
        store.set(&key, "v2".into()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from("v2"));
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        let err = store.get(&StoreKey::from(["absent"])).await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn set_returns_location_and_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        let key = StoreKey::from(["a", "b", "c.txt"]);
        let location = store.set(&key, "x".into()).await.unwrap();
        assert!(location.ends_with("store/a/b/c.txt"));
        assert!(Path::new(&location).is_file());
    }

    #[tokio::test]
    async fn remove_key_cleans_empty_ancestors() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        let key = StoreKey::from(["a", "b", "c.txt"]);
        store.set(&key, "x".into()).await.unwrap();

        assert!(store.remove_key(&key).await.unwrap());
        assert!(!temp_dir.path().join("store/a").exists());
        assert!(store.base_directory().is_dir());
    }

    #[tokio::test]
    async fn remove_key_stops_at_non_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        store
            .set(&StoreKey::from(["a", "b", "one.txt"]), "1".into())
            .await
            .unwrap();
        store
            .set(&StoreKey::from(["a", "two.txt"]), "2".into())
            .await
            .unwrap();

        assert!(store
            .remove_key(&StoreKey::from(["a", "b", "one.txt"]))
            .await
            .unwrap());
        assert!(!temp_dir.path().join("store/a/b").exists());
        assert!(temp_dir.path().join("store/a/two.txt").is_file());
    }

    #[tokio::test]
    async fn remove_missing_key_returns_false() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        assert!(!store.remove_key(&StoreKey::from(["nope"])).await.unwrap());
    }

    #[tokio::test]
    async fn move_semantics() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        let src = StoreKey::from(["runs", "old"]);
        let dst = StoreKey::from(["runs", "new"]);

        assert!(!store.move_key(&src, &dst).await.unwrap());
        assert!(store.list_keys(&[]).await.unwrap().is_empty());

        store.set(&src, "payload".into()).await.unwrap();
        assert!(store.move_key(&src, &dst).await.unwrap());
        assert!(!store.has_key(&src).await.unwrap());
        assert_eq!(store.get(&dst).await.unwrap(), Bytes::from("payload"));
    }

    #[tokio::test]
    async fn list_keys_filters_foreign_and_ignored_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(
            &temp_dir,
            PathSpec {
                suffix: Some(".json".to_string()),
                ..Default::default()
            },
        )
        .with_ignored_keys([StoreKey::from([".store_id"])]);

        store
            .set(&StoreKey::from(["suites", "alpha"]), "{}".into())
            .await
            .unwrap();
        store
            .set(&StoreKey::from([".store_id"]), "id".into())
            .await
            .unwrap();
        // A foreign file that fails the suffix filter.
        std::fs::write(temp_dir.path().join("store/README.txt"), "hi").unwrap();

        let keys = store.list_keys(&[]).await.unwrap();
        assert_eq!(keys, vec![StoreKey::from(["suites", "alpha"])]);
    }

    #[tokio::test]
    async fn list_keys_with_template_skips_undecodable_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(
            &temp_dir,
            PathSpec {
                template: Some("suites/{0}/{1}.json".to_string()),
                ..Default::default()
            },
        );
        store
            .set(&StoreKey::from(["demo", "failure"]), "{}".into())
            .await
            .unwrap();
        std::fs::create_dir_all(temp_dir.path().join("store/other")).unwrap();
        std::fs::write(temp_dir.path().join("store/other/file.json"), "x").unwrap();

        let keys = store.list_keys(&[]).await.unwrap();
        assert_eq!(keys, vec![StoreKey::from(["demo", "failure"])]);
    }

    #[tokio::test]
    async fn list_keys_under_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        store
            .set(&StoreKey::from(["suites", "alpha"]), "a".into())
            .await
            .unwrap();
        store
            .set(&StoreKey::from(["results", "beta"]), "b".into())
            .await
            .unwrap();

        let keys = store.list_keys(&["suites".to_string()]).await.unwrap();
        assert_eq!(keys, vec![StoreKey::from(["suites", "alpha"])]);
    }

    #[tokio::test]
    async fn get_url_for_key_builds_file_locator() {
        let temp_dir = TempDir::new().unwrap();
        let store = backend(&temp_dir, PathSpec::default());
        let key = StoreKey::from(["suites", "demo"]);
        let url = store.get_url_for_key(&key, None).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("store/suites/demo"));

        let url = store.get_url_for_key(&key, Some("custom:")).unwrap();
        assert!(url.starts_with("custom://"));
    }

    #[test]
    fn relative_base_requires_absolute_root() {
        let config = FilesystemConfig {
            base_directory: "relative".to_string(),
            root_directory: None,
        };
        let err = FilesystemStoreBackend::new(&config, &PathSpec::default()).unwrap_err();
        assert!(matches!(err, StoreError::Initialization(_)));

        let config = FilesystemConfig {
            base_directory: "relative".to_string(),
            root_directory: Some("also/relative".to_string()),
        };
        let err = FilesystemStoreBackend::new(&config, &PathSpec::default()).unwrap_err();
        assert!(matches!(err, StoreError::Initialization(_)));
    }

    #[test]
    fn construction_creates_parent_but_not_base() {
        let temp_dir = TempDir::new().unwrap();
        let config = FilesystemConfig {
            base_directory: temp_dir
                .path()
                .join("nested/store")
                .to_str()
                .unwrap()
                .to_string(),
            root_directory: None,
        };
        let store = FilesystemStoreBackend::new(&config, &PathSpec::default()).unwrap();
        assert!(temp_dir.path().join("nested").is_dir());
        assert!(!store.base_directory().exists());
    }
}
