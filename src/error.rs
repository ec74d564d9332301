use thiserror::Error;

/// Errors surfaced by the store contract and the key/path codec.
///
/// Validation failures are raised locally and eagerly; physical storage
/// errors pass through untranslated except for the missing-object case,
/// which every backend reports as [`StoreError::ObjectNotFound`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("key has {got} components but the path template expects {expected}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("stored value is not valid UTF-8 text")]
    InvalidValueType(#[from] std::string::FromUtf8Error),

    #[error(
        "path template {template:?} is not reversible for keys of length {arity}; \
         have you included all key components in the template?"
    )]
    TemplateNotReversible { template: String, arity: usize },

    #[error("path {path:?} does not start with the configured prefix {prefix:?}")]
    PrefixMismatch { path: String, prefix: String },

    #[error("path {path:?} does not end with the configured suffix {suffix:?}")]
    SuffixMismatch { path: String, suffix: String },

    #[error("no object stored at {path:?}")]
    ObjectNotFound { path: String },

    #[error("store backend initialization failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
