//! Driver SPI: what a storage backend implements.
//!
//! The portable facade in [`crate::bucket`] only ever talks to these traits.
//! Drivers classify provider errors into [`cloudblob_common::Error`] before
//! returning them and never retry internally; retry policy belongs to the
//! provider client underneath.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;

use cloudblob_common::{BlobKey, Result};

use crate::probe::Native;
use crate::writer::WriterOptions;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Attributes a driver reader reports once the object is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderAttributes {
    pub content_type: String,
    /// Size of the whole object, not of the requested range.
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Attributes as returned by a driver.
#[derive(Clone)]
pub struct DriverAttributes {
    pub content_type: String,
    pub content_language: Option<String>,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub etag: Option<String>,
    /// Provider-native "head" response, if the driver exposes one.
    pub native: Option<Native>,
}

/// Options for a single listing request.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Maximum number of objects per page; [`DEFAULT_PAGE_SIZE`] if unset.
    pub page_size: Option<usize>,
    /// Continuation token from a previous [`ListPage`].
    pub page_token: Option<String>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    pub(crate) fn effective_page_size(&self) -> usize {
        self.page_size.filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObject {
    pub key: BlobKey,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A page of listing results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListObject>,
    /// Token for the next page; `None` when the listing is complete.
    pub next_page_token: Option<String>,
}

/// Storage backend.
///
/// All operations are async and may perform network I/O.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short driver name (e.g., "memblob", "fileblob").
    fn name(&self) -> &str;

    /// Open a reader over `length` bytes starting at `offset`.
    ///
    /// `None` reads to the end of the object. A length reaching past the end
    /// is clamped.
    ///
    /// # Errors
    /// - `NotFound` if the key is absent
    /// - `InvalidRange` if `offset` is greater than the object size
    async fn new_range_reader(
        &self,
        key: &BlobKey,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Box<dyn DriverReader>>;

    /// Open an upload session for `key`.
    ///
    /// The driver must run `opts.run_before_write` exactly once, on its
    /// native request object (or an empty probe), before sending any byte.
    /// Nothing is visible under `key` until the returned writer is closed.
    async fn new_typed_writer(
        &self,
        key: &BlobKey,
        content_type: &str,
        opts: WriterOptions,
    ) -> Result<Box<dyn DriverWriter>>;

    /// # Errors
    /// - `NotFound` if the key is absent
    async fn attributes(&self, key: &BlobKey) -> Result<DriverAttributes>;

    /// # Errors
    /// - `NotFound` if the key is absent
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    /// Fetch one page of keys. Ordering must be stable within a listing.
    async fn list_paged(&self, opts: &ListOptions) -> Result<ListPage>;

    /// The provider client behind this driver.
    fn as_native(&self) -> Option<&(dyn Any + Send + Sync)> {
        None
    }
}

/// Open read stream over one object.
#[async_trait]
pub trait DriverReader: Send {
    /// Read into `buf`, returning 0 at end of range.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn attributes(&self) -> &ReaderAttributes;

    /// Provider-native "get" response.
    fn as_native(&self) -> Option<&(dyn Any + Send + Sync)> {
        None
    }

    /// Release the underlying stream.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Open upload session.
///
/// Dropping a writer without `close` must discard the upload.
#[async_trait]
pub trait DriverWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Commit the upload.
    async fn close(self: Box<Self>) -> Result<()>;

    /// Discard the upload.
    async fn abort(self: Box<Self>) -> Result<()>;
}
