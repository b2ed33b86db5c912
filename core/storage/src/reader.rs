//! Portable reader.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use tokio_util::sync::CancellationToken;

use cloudblob_common::{BlobKey, Error, Result};

use crate::bucket::cancellable;
use crate::driver::{DriverReader, ReaderAttributes};
use crate::probe::Probe;

const READ_CHUNK: usize = 32 * 1024;

/// Sequential reader over one object or a byte range of it.
///
/// A reader owns the driver stream until [`Reader::close`] or drop. It is not
/// meant to be shared between tasks.
pub struct Reader {
    key: BlobKey,
    attrs: ReaderAttributes,
    inner: Option<Box<dyn DriverReader>>,
    cancel: CancellationToken,
}

impl Reader {
    pub(crate) fn new(
        key: BlobKey,
        inner: Box<dyn DriverReader>,
        cancel: CancellationToken,
    ) -> Self {
        let attrs = inner.attributes().clone();
        Self {
            key,
            attrs,
            inner: Some(inner),
            cancel,
        }
    }

    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    /// Size of the whole object.
    pub fn size(&self) -> u64 {
        self.attrs.size
    }

    pub fn content_type(&self) -> &str {
        &self.attrs.content_type
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.attrs.modified
    }

    /// Read into `buf`. Returns 0 once the range is exhausted.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(|| {
            Error::InvalidInput(format!("Reader for {} is closed", self.key))
        })?;
        cancellable(&self.cancel, "read", inner.read(buf)).await
    }

    /// Read the remainder of the range.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Probe the provider-native "get" response.
    pub fn as_native<T: Any>(&self) -> Option<&T> {
        self.probe().get::<T>()
    }

    pub fn probe(&self) -> Probe<'_> {
        Probe::from_option(self.inner.as_deref().and_then(|inner| inner.as_native()))
    }

    /// Release the underlying stream.
    pub async fn close(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("key", &self.key)
            .field("attrs", &self.attrs)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
