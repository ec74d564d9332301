use anyhow::Result;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Key-to-path layout shared by every backend flavor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSpec {
    /// Template with `{i}` placeholders; fixes the key arity to the number
    /// of distinct indices. Mutually exclusive with `suffix`.
    pub template: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// Substrings no key component may contain. Defaults to `/` and `\`.
    pub forbidden_substrings: Option<Vec<String>>,
    /// Defaults to on for filesystem stores and off for cloud object keys.
    pub platform_specific_separator: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// May be relative, in which case `root_directory` must be absolute.
    pub base_directory: String,
    pub root_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Top-level store configuration: a path layout plus exactly one physical
/// backend section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TupleStoreConfig {
    #[serde(default)]
    pub path: PathSpec,
    pub filesystem: Option<FilesystemConfig>,
    pub s3: Option<S3Config>,
    pub gcs: Option<GcsConfig>,
    /// Reserved keys excluded from `list_keys`.
    #[serde(default)]
    pub ignored_keys: Vec<Vec<String>>,
}

impl TupleStoreConfig {
    pub fn from_path(path: &str) -> Result<TupleStoreConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<TupleStoreConfig> {
        let config: TupleStoreConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let configured = [
            self.filesystem.is_some(),
            self.s3.is_some(),
            self.gcs.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if configured == 0 {
            return Err(anyhow::anyhow!(
                "must specify one of filesystem, s3 or gcs storage"
            ));
        }
        if configured > 1 {
            return Err(anyhow::anyhow!(
                "cannot specify more than one storage backend"
            ));
        }
        Ok(())
    }
}
