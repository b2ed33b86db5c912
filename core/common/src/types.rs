//! Common types used throughout cloudblob.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of a blob within a bucket.
///
/// Keys are opaque to the portable API: any non-empty UTF-8 string without
/// NUL bytes. Drivers that map keys onto hierarchical namespaces interpret
/// `/` as a separator through [`BlobKey::components`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    /// Parse a key.
    ///
    /// # Errors
    /// - Returns error if the key is empty or contains a NUL byte
    pub fn parse(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Blob key cannot be empty".to_string(),
            ));
        }
        if key.contains('\0') {
            return Err(crate::Error::InvalidInput(format!(
                "Blob key cannot contain NUL: {:?}",
                key
            )));
        }
        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split on `/`. Empty components are preserved.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last `/`-separated component.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Check whether this key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BlobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BlobKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for BlobKey {
    type Error = crate::Error;

    fn try_from(value: &str) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}
