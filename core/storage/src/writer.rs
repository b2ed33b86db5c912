//! Portable writer and writer options.

use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cloudblob_common::{BlobKey, Error, ErrorCode, Result};

use crate::bucket::cancellable;
use crate::driver::DriverWriter;
use crate::probe::ProbeMut;

/// Hook run against the provider-native upload request before it is sent.
pub type BeforeWriteFn = Box<dyn FnOnce(&mut ProbeMut<'_>) -> Result<()> + Send>;

/// Options for [`crate::Bucket::new_writer`].
#[derive(Default)]
pub struct WriterOptions {
    /// Hint for how many bytes a driver buffers before sending.
    pub buffer_size: Option<usize>,
    /// User-defined metadata stored with the object.
    pub metadata: HashMap<String, String>,
    /// Commit only if the existing object carries this ETag.
    pub if_match: Option<String>,
    /// Language of the content, stored as the object's content language.
    pub content_language: Option<String>,
    before_write: Option<BeforeWriteFn>,
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_content_language(mut self, language: impl Into<String>) -> Self {
        self.content_language = Some(language.into());
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Register a hook that may inspect and mutate the driver's native
    /// upload request.
    ///
    /// The hook runs once, before any byte is sent. Returning an error makes
    /// `new_writer` fail with [`Error::Config`].
    pub fn before_write<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut ProbeMut<'_>) -> Result<()> + Send + 'static,
    {
        self.before_write = Some(Box::new(hook));
        self
    }

    pub fn has_before_write(&self) -> bool {
        self.before_write.is_some()
    }

    /// Run the registered hook against `probe`. Later calls are no-ops.
    pub fn run_before_write(&mut self, mut probe: ProbeMut<'_>) -> Result<()> {
        let Some(hook) = self.before_write.take() else {
            return Ok(());
        };
        hook(&mut probe).map_err(|err| match err {
            Error::Config(_) => err,
            other => Error::Config(format!("before_write hook failed: {}", other)),
        })
    }
}

impl fmt::Debug for WriterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterOptions")
            .field("buffer_size", &self.buffer_size)
            .field("metadata", &self.metadata)
            .field("if_match", &self.if_match)
            .field("content_language", &self.content_language)
            .field("before_write", &self.before_write.is_some())
            .finish()
    }
}

/// Sequential writer for one object.
///
/// Bytes become visible only after [`Writer::close`] succeeds. Dropping the
/// writer, calling [`Writer::abort`], a failed write, or cancellation all
/// discard the upload.
pub struct Writer {
    key: BlobKey,
    inner: Option<Box<dyn DriverWriter>>,
    cancel: CancellationToken,
    written: u64,
}

impl Writer {
    pub(crate) fn new(
        key: BlobKey,
        inner: Box<dyn DriverWriter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            inner: Some(inner),
            cancel,
            written: 0,
        }
    }

    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(|| {
            Error::InvalidInput(format!("Writer for {} is already finished", self.key))
        })?;

        match cancellable(&self.cancel, "write", inner.write(buf)).await {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(err) => {
                self.discard().await;
                Err(err)
            }
        }
    }

    /// Write the whole buffer.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(Error::unknown(
                    format!("write to {}", self.key),
                    "driver accepted zero bytes",
                ));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Commit the upload.
    ///
    /// # Postconditions
    /// - On success the object is visible with its new bytes and attributes
    /// - On any error the previous object, if there was one, is unchanged
    ///
    /// # Errors
    /// - `Cancelled` if the bucket's token fired before the commit finished
    /// - `PreconditionFailed` if the driver enforces `if_match` and the ETag
    ///   no longer matches
    pub async fn close(mut self) -> Result<()> {
        let inner = self.inner.take().ok_or_else(|| {
            Error::InvalidInput(format!("Writer for {} is already finished", self.key))
        })?;

        if self.cancel.is_cancelled() {
            abort_quietly(&self.key, inner).await;
            return Err(Error::Cancelled(format!("close {}", self.key)));
        }

        cancellable(&self.cancel, "close", inner.close()).await?;
        debug!(key = %self.key, bytes = self.written, "committed blob");
        Ok(())
    }

    /// Discard the upload.
    pub async fn abort(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => inner.abort().await,
            None => Ok(()),
        }
    }

    async fn discard(&mut self) {
        if let Some(inner) = self.inner.take() {
            abort_quietly(&self.key, inner).await;
        }
    }
}

async fn abort_quietly(key: &BlobKey, inner: Box<dyn DriverWriter>) {
    if let Err(err) = inner.abort().await {
        if err.code() != ErrorCode::NotFound {
            warn!(key = %key, error = %err, "failed to discard upload");
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(key = %self.key, "writer dropped without close, discarding upload");
        }
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("key", &self.key)
            .field("written", &self.written)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
