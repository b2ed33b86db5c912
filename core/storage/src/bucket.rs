//! Portable bucket facade.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use cloudblob_common::{BlobKey, Error, Result};

use crate::attributes::Attributes;
use crate::driver::{Driver, ListOptions, ListPage};
use crate::list::ListIter;
use crate::probe::Probe;
use crate::reader::Reader;
use crate::writer::{Writer, WriterOptions};

/// Content type used when the caller passes an empty one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Race `fut` against `token`, dropping `fut` if the token fires first.
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(Error::Cancelled(op.to_string()));
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled(op.to_string())),
        res = fut => res,
    }
}

/// A bucket of blobs backed by one driver.
///
/// Cloning is cheap and clones share the driver, so a bucket can be handed
/// to many tasks at once. Readers and writers it creates are exclusively
/// owned by their caller.
#[derive(Clone)]
pub struct Bucket {
    driver: Arc<dyn Driver>,
    cancel: CancellationToken,
}

impl Bucket {
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    pub fn from_arc(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            cancel: CancellationToken::new(),
        }
    }

    /// A handle on the same driver whose operations fail with
    /// [`Error::Cancelled`] once `token` fires.
    ///
    /// Readers and writers opened through the returned handle observe the
    /// token too. In-flight driver calls are dropped on cancellation.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            driver: self.driver.clone(),
            cancel: token,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Open a reader over the whole object.
    ///
    /// # Errors
    /// - `NotFound` if the key is absent
    pub async fn new_reader(&self, key: &str) -> Result<Reader> {
        self.new_range_reader(key, 0, None).await
    }

    /// Open a reader over `length` bytes starting at `offset`.
    ///
    /// `None` reads to the end; a length past the end is clamped.
    ///
    /// # Errors
    /// - `NotFound` if the key is absent
    /// - `InvalidRange` if `offset` is greater than the object size
    pub async fn new_range_reader(
        &self,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Reader> {
        let key = BlobKey::parse(key)?;
        let inner = cancellable(
            &self.cancel,
            "new_reader",
            self.driver.new_range_reader(&key, offset, length),
        )
        .await?;
        debug!(driver = self.driver.name(), key = %key, offset, ?length, "opened reader");
        Ok(Reader::new(key, inner, self.cancel.clone()))
    }

    /// Read a whole object into memory.
    pub async fn read_all(&self, key: &str) -> Result<Vec<u8>> {
        let mut reader = self.new_reader(key).await?;
        let data = reader.read_to_end().await?;
        reader.close().await?;
        Ok(data)
    }

    /// Open a writer for `key`.
    ///
    /// Nothing is created until [`Writer::close`] succeeds. Concurrent writers
    /// to the same key are not coordinated; which upload wins is up to the
    /// driver.
    ///
    /// # Postconditions
    /// - An empty `content_type` is replaced by the default content type
    /// - `opts.before_write` has run against the driver's native request
    ///
    /// # Errors
    /// - `InvalidInput` if `key` is not a valid blob key
    /// - `Config` if a registered `before_write` hook fails
    pub async fn new_writer(
        &self,
        key: &str,
        content_type: &str,
        opts: WriterOptions,
    ) -> Result<Writer> {
        let key = BlobKey::parse(key)?;
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        let inner = cancellable(
            &self.cancel,
            "new_writer",
            self.driver.new_typed_writer(&key, content_type, opts),
        )
        .await?;
        debug!(driver = self.driver.name(), key = %key, content_type, "opened writer");
        Ok(Writer::new(key, inner, self.cancel.clone()))
    }

    /// Write `data` to `key` and commit.
    pub async fn write_all(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
        opts: WriterOptions,
    ) -> Result<()> {
        let mut writer = self.new_writer(key, content_type, opts).await?;
        writer.write_all(data).await?;
        writer.close().await
    }

    /// # Errors
    /// - `NotFound` if the key is absent
    pub async fn attributes(&self, key: &str) -> Result<Attributes> {
        let key = BlobKey::parse(key)?;
        let attrs = cancellable(&self.cancel, "attributes", self.driver.attributes(&key)).await?;
        Ok(Attributes::from(attrs))
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.attributes(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// - `NotFound` if the key is absent, including when it was already deleted
    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = BlobKey::parse(key)?;
        cancellable(&self.cancel, "delete", self.driver.delete(&key)).await?;
        debug!(driver = self.driver.name(), key = %key, "deleted blob");
        Ok(())
    }

    /// Lazily iterate over the keys matching `opts`.
    pub fn list(&self, opts: ListOptions) -> ListIter {
        ListIter::new(self.clone(), opts)
    }

    /// Fetch a single page. Pass the returned `next_page_token` back in
    /// `opts.page_token` to continue, or to restart from that point later.
    pub async fn list_page(&self, opts: &ListOptions) -> Result<ListPage> {
        cancellable(&self.cancel, "list", self.driver.list_paged(opts)).await
    }

    /// Probe the driver's provider client.
    pub fn as_native<T: Any>(&self) -> Option<&T> {
        self.probe().get::<T>()
    }

    pub fn probe(&self) -> Probe<'_> {
        Probe::from_option(self.driver.as_native())
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("driver", &self.driver.name())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memblob::{self, MemClient};
    use cloudblob_common::ErrorCode;

    async fn test_bucket() -> Bucket {
        let client = MemClient::new("local");
        client.create_bucket("test").unwrap();
        memblob::open_bucket(client, "test").unwrap()
    }

    #[tokio::test]
    async fn test_empty_content_type_defaults() {
        let bucket = test_bucket().await;
        bucket
            .write_all("a", b"xyz", "", WriterOptions::new())
            .await
            .unwrap();

        let attrs = bucket.attributes("a").await.unwrap();
        assert_eq!(attrs.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let bucket = test_bucket().await;
        let err = bucket.new_reader("").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_exists() {
        let bucket = test_bucket().await;
        assert!(!bucket.exists("k").await.unwrap());
        bucket
            .write_all("k", b"1", "text/plain", WriterOptions::new())
            .await
            .unwrap();
        assert!(bucket.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_bucket_fails_fast() {
        let bucket = test_bucket().await;
        let token = CancellationToken::new();
        let cancelled = bucket.with_cancellation(token.clone());
        token.cancel();

        let err = cancelled.attributes("anything").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);

        // The original handle is unaffected.
        assert!(bucket.attributes("anything").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_discards_open_writer() {
        let bucket = test_bucket().await;
        let token = CancellationToken::new();
        let scoped = bucket.with_cancellation(token.clone());

        let mut writer = scoped
            .new_writer("partial", "text/plain", WriterOptions::new())
            .await
            .unwrap();
        writer.write(b"half").await.unwrap();
        token.cancel();

        let err = writer.close().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert!(!bucket.exists("partial").await.unwrap());
    }

    #[tokio::test]
    async fn test_bucket_is_shareable_across_tasks() {
        let bucket = test_bucket().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("task/{}", i);
                bucket
                    .write_all(&key, key.as_bytes(), "text/plain", WriterOptions::new())
                    .await?;
                bucket.read_all(&key).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let data = handle.await.unwrap().unwrap();
            assert_eq!(data, format!("task/{}", i).into_bytes());
        }
    }
}
