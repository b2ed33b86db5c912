//! Portable attribute snapshot.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::driver::DriverAttributes;
use crate::probe::{Native, Probe};

/// Metadata of one object, captured when it was read.
///
/// The provider-native "head" response (if any) is kept alongside and can be
/// reached through [`Attributes::as_native`].
#[derive(Clone)]
pub struct Attributes {
    pub content_type: String,
    pub content_language: Option<String>,
    pub metadata: HashMap<String, String>,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub etag: Option<String>,
    native: Option<Native>,
}

impl Attributes {
    /// Probe the provider-native head response.
    pub fn as_native<T: Any>(&self) -> Option<&T> {
        self.probe().get::<T>()
    }

    pub fn probe(&self) -> Probe<'_> {
        Probe::from_option(self.native.as_deref())
    }
}

impl From<DriverAttributes> for Attributes {
    fn from(attrs: DriverAttributes) -> Self {
        Self {
            content_type: attrs.content_type,
            content_language: attrs.content_language,
            metadata: attrs.metadata,
            modified: attrs.modified,
            size: attrs.size,
            etag: attrs.etag,
            native: attrs.native,
        }
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("content_type", &self.content_type)
            .field("content_language", &self.content_language)
            .field("metadata", &self.metadata)
            .field("modified", &self.modified)
            .field("size", &self.size)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}
