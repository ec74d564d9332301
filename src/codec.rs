use std::{collections::BTreeSet, fmt, sync::OnceLock};

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::PathSpec, error::StoreError};

const DEFAULT_FORBIDDEN_SUBSTRINGS: [&str; 2] = ["/", "\\"];

/// An ordered tuple of string components identifying a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(Vec<String>);

impl StoreKey {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StoreKey(components.into_iter().map(Into::into).collect())
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &[String]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<Vec<String>> for StoreKey {
    fn from(components: Vec<String>) -> Self {
        StoreKey(components)
    }
}

impl<const N: usize> From<[&str; N]> for StoreKey {
    fn from(components: [&str; N]) -> Self {
        StoreKey::new(components)
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\d+)\}").unwrap())
}

/// A path template compiled once at backend construction: the substitution
/// plan for `encode` and the capture regex for `decode`.
#[derive(Debug, Clone)]
struct CompiledTemplate {
    raw: String,
    /// Literal spans between placeholders, one more entry than occurrences.
    literals: Vec<String>,
    /// Placeholder index for each occurrence, in template order.
    occurrence_indices: Vec<usize>,
    /// Number of distinct placeholder indices.
    arity: usize,
    pattern: Regex,
}

impl CompiledTemplate {
    fn compile(raw: &str) -> Result<Self, StoreError> {
        let mut literals = Vec::new();
        let mut occurrence_indices = Vec::new();
        let mut distinct = BTreeSet::new();
        let mut pattern = String::from("^");
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(raw) {
            let m = caps.get(0).unwrap();
            let index: usize =
                caps[1]
                    .parse()
                    .map_err(|_| StoreError::TemplateNotReversible {
                        template: raw.to_string(),
                        arity: 0,
                    })?;
            let literal = &raw[last..m.start()];
            pattern.push_str(&regex::escape(literal));
            pattern.push_str(&format!("(?P<tuple_index_{}>.*)", occurrence_indices.len()));
            literals.push(literal.to_string());
            occurrence_indices.push(index);
            distinct.insert(index);
            last = m.end();
        }
        let tail = &raw[last..];
        pattern.push_str(&regex::escape(tail));
        pattern.push('$');
        literals.push(tail.to_string());

        let arity = distinct.len();
        // Every index in [0, arity) must appear, otherwise a slot of the
        // decoded key could never be filled in.
        if !distinct.iter().copied().eq(0..arity) {
            return Err(StoreError::TemplateNotReversible {
                template: raw.to_string(),
                arity,
            });
        }

        let pattern = Regex::new(&pattern).map_err(|_| StoreError::TemplateNotReversible {
            template: raw.to_string(),
            arity,
        })?;

        Ok(CompiledTemplate {
            raw: raw.to_string(),
            literals,
            occurrence_indices,
            arity,
            pattern,
        })
    }

    fn substitute(&self, key: &StoreKey) -> Result<String, StoreError> {
        if key.len() != self.arity {
            return Err(StoreError::ArityMismatch {
                expected: self.arity,
                got: key.len(),
            });
        }
        let mut out = String::new();
        for (occurrence, index) in self.occurrence_indices.iter().enumerate() {
            out.push_str(&self.literals[occurrence]);
            out.push_str(&key.components()[*index]);
        }
        out.push_str(self.literals.last().unwrap());
        Ok(out)
    }
}

/// Bidirectional mapping between tuple keys and backend path strings.
///
/// With a template, keys have a fixed arity equal to the template's count of
/// distinct `{i}` placeholders; without one, keys are joined with `/`. The
/// optional prefix and suffix are applied around the substituted template.
/// Construction self-checks that encode followed by decode recovers a random
/// key exactly, and refuses ambiguous templates.
#[derive(Debug, Clone)]
pub struct KeyPathCodec {
    template: Option<CompiledTemplate>,
    prefix: Option<String>,
    suffix: Option<String>,
    forbidden_substrings: Vec<String>,
    platform_specific_separator: bool,
}

impl KeyPathCodec {
    /// Codec for local filesystem layouts; paths are normalized to the host
    /// separator convention unless the path spec says otherwise.
    pub fn for_filesystem(spec: &PathSpec) -> Result<Self, StoreError> {
        Self::build(spec, spec.platform_specific_separator.unwrap_or(true))
    }

    /// Codec for cloud object keys, which are always forward-slash joined.
    pub fn for_object_store(spec: &PathSpec) -> Result<Self, StoreError> {
        Self::build(spec, spec.platform_specific_separator.unwrap_or(false))
    }

    fn build(spec: &PathSpec, platform_specific_separator: bool) -> Result<Self, StoreError> {
        let forbidden_substrings = spec.forbidden_substrings.clone().unwrap_or_else(|| {
            DEFAULT_FORBIDDEN_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        if spec.template.is_some() && spec.suffix.is_some() {
            return Err(StoreError::Initialization(
                "a path suffix may only be used when no path template is set".to_string(),
            ));
        }

        if let Some(prefix) = &spec.prefix {
            if forbidden_substrings.iter().any(|s| prefix.ends_with(s)) {
                return Err(StoreError::Initialization(format!(
                    "path prefix {:?} may not end with a forbidden substring ({:?})",
                    prefix, forbidden_substrings
                )));
            }
        }

        let template = spec
            .template
            .as_deref()
            .map(CompiledTemplate::compile)
            .transpose()?;

        let codec = KeyPathCodec {
            template,
            prefix: spec.prefix.clone(),
            suffix: spec.suffix.clone(),
            forbidden_substrings,
            platform_specific_separator,
        };
        codec.verify_reversible()?;
        Ok(codec)
    }

    /// Fixed key arity when a template is configured, `None` for
    /// variable-length keys.
    pub fn key_length(&self) -> Option<usize> {
        self.template.as_ref().map(|t| t.arity)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    fn validate_key(&self, key: &StoreKey) -> Result<(), StoreError> {
        for component in key.components() {
            if component.is_empty() {
                return Err(StoreError::InvalidKey {
                    key: key.to_string(),
                    reason: "key components must be non-empty".to_string(),
                });
            }
            for substring in &self.forbidden_substrings {
                if component.contains(substring.as_str()) {
                    return Err(StoreError::InvalidKey {
                        key: key.to_string(),
                        reason: format!(
                            "key components must not contain any of {:?}",
                            self.forbidden_substrings
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Converts a key into a path string.
    pub fn encode(&self, key: &StoreKey) -> Result<String, StoreError> {
        self.validate_key(key)?;

        let mut path = match &self.template {
            Some(template) => template.substitute(key)?,
            None => key.components().join("/"),
        };

        if let Some(prefix) = &self.prefix {
            path = format!("{}/{}", prefix, path);
        }
        if let Some(suffix) = &self.suffix {
            path.push_str(suffix);
        }
        if self.platform_specific_separator {
            path = normalize_path(&path);
        }
        Ok(path)
    }

    /// Converts a path string back into a key.
    ///
    /// Returns `Ok(None)` when the path does not belong to this store (a
    /// decode miss, not an error); affix mismatches are hard errors.
    pub fn decode(&self, path: &str) -> Result<Option<StoreKey>, StoreError> {
        let mut path = if self.platform_specific_separator {
            normalize_path(path)
        } else {
            path.to_string()
        };

        if let Some(prefix) = &self.prefix {
            // Paths shorter than prefix + separator tolerate the mismatch;
            // everything longer must start with the prefix.
            if !path.starts_with(prefix.as_str()) && path.len() >= prefix.len() + 1 {
                return Err(StoreError::PrefixMismatch {
                    path,
                    prefix: prefix.clone(),
                });
            }
            path = path.get(prefix.len() + 1..).unwrap_or_default().to_string();
        }

        if let Some(suffix) = &self.suffix {
            match path.strip_suffix(suffix.as_str()) {
                Some(stripped) => path = stripped.to_string(),
                None => {
                    return Err(StoreError::SuffixMismatch {
                        path,
                        suffix: suffix.clone(),
                    })
                }
            }
        }

        match &self.template {
            Some(template) => {
                let Some(captures) = template.pattern.captures(&path) else {
                    debug!(path = %path, "path does not match the store template");
                    return Ok(None);
                };
                let mut components = vec![String::new(); template.arity];
                for (occurrence, index) in template.occurrence_indices.iter().enumerate() {
                    let group = format!("tuple_index_{}", occurrence);
                    // A later occurrence of the same index overwrites the
                    // earlier capture.
                    components[*index] = captures
                        .name(&group)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                }
                Ok(Some(StoreKey::from(components)))
            }
            None => {
                let separator = if self.platform_specific_separator {
                    std::path::MAIN_SEPARATOR
                } else {
                    '/'
                };
                let components: Vec<String> =
                    path.split(separator).map(|s| s.to_string()).collect();
                Ok(Some(StoreKey::from(components)))
            }
        }
    }

    /// One-time construction self-check: a random hex key of the template's
    /// arity must round-trip through encode and decode unchanged.
    fn verify_reversible(&self) -> Result<(), StoreError> {
        let Some(template) = &self.template else {
            return Ok(());
        };
        let mut rng = rand::rng();
        let key = StoreKey::new((0..template.arity).map(|_| random_hex(&mut rng, 4)));
        let path = self.encode(&key)?;
        let decoded = self.decode(&path)?;
        if decoded.as_ref() != Some(&key) {
            return Err(StoreError::TemplateNotReversible {
                template: template.raw.clone(),
                arity: template.arity,
            });
        }
        Ok(())
    }
}

fn random_hex(rng: &mut impl Rng, len: usize) -> String {
    const HEX: &[u8] = b"ABCDEF0123456789";
    (0..len)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}

/// Lexical path normalization: collapses redundant separators and resolves
/// `.` and `..` segments without touching the filesystem.
pub(crate) fn normalize_path(path: &str) -> String {
    let separator = std::path::MAIN_SEPARATOR;
    let is_separator = |c: char| c == '/' || c == separator;
    let absolute = path.chars().next().map(is_separator).unwrap_or(false);

    let mut stack: Vec<&str> = Vec::new();
    for part in path.split(is_separator) {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(stack.last(), Some(&last) if last != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join(&separator.to_string());
    if absolute {
        format!("{}{}", separator, joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
