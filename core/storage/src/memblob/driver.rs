//! memblob driver implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use cloudblob_common::{BlobKey, Error, Result};

use crate::bucket::Bucket;
use crate::driver::{
    Driver, DriverAttributes, DriverReader, DriverWriter, ListOptions, ListPage,
    ReaderAttributes,
};
use crate::probe::ProbeMut;
use crate::writer::WriterOptions;

use super::client::{GetObjectOutput, MemClient, PutObjectInput};

fn default_region() -> String {
    "local".to_string()
}

/// memblob configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemblobConfig {
    pub bucket_name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

/// Driver over one bucket of a [`MemClient`].
pub struct MemBucket {
    client: MemClient,
    bucket: String,
}

impl MemBucket {
    /// # Errors
    /// - `NotFound` if the client has no such bucket
    pub fn new(client: MemClient, bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        if !client.has_bucket(&bucket) {
            return Err(Error::NotFound(format!("Bucket not found: {}", bucket)));
        }
        Ok(Self { client, bucket })
    }

    /// Build a fresh client holding a single empty bucket.
    pub fn from_config(config: &MemblobConfig) -> Result<Self> {
        let client = MemClient::new(config.region.clone());
        client.create_bucket(&config.bucket_name)?;
        Self::new(client, config.bucket_name.clone())
    }
}

/// Open a portable bucket over `bucket_name` in `client`.
pub fn open_bucket(client: MemClient, bucket_name: &str) -> Result<Bucket> {
    Ok(Bucket::new(MemBucket::new(client, bucket_name)?))
}

/// Create a memblob driver from configuration.
pub fn create_memblob_driver(config: serde_json::Value) -> Result<Arc<dyn Driver>> {
    let config: MemblobConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid memblob config: {}", e)))?;
    Ok(Arc::new(MemBucket::from_config(&config)?))
}

#[async_trait]
impl Driver for MemBucket {
    fn name(&self) -> &str {
        "memblob"
    }

    async fn new_range_reader(
        &self,
        key: &BlobKey,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Box<dyn DriverReader>> {
        let (output, body, size) =
            self.client
                .get_object(&self.bucket, key.as_str(), offset, length)?;
        debug!(key = %key, offset, len = body.len(), "memblob get");
        Ok(Box::new(MemReader {
            attrs: ReaderAttributes {
                content_type: output.content_type.clone(),
                size,
                modified: output.last_modified,
            },
            output,
            body,
        }))
    }

    async fn new_typed_writer(
        &self,
        key: &BlobKey,
        content_type: &str,
        mut opts: WriterOptions,
    ) -> Result<Box<dyn DriverWriter>> {
        if !self.client.has_bucket(&self.bucket) {
            return Err(Error::NotFound(format!("Bucket not found: {}", self.bucket)));
        }
        let mut input = PutObjectInput {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            content_language: opts.content_language.take(),
            cache_control: None,
            metadata: std::mem::take(&mut opts.metadata),
        };
        opts.run_before_write(ProbeMut::new(&mut input))?;

        Ok(Box::new(MemWriter {
            client: self.client.clone(),
            input,
            if_match: opts.if_match.take(),
            buf: BytesMut::with_capacity(opts.buffer_size.unwrap_or(0)),
        }))
    }

    async fn attributes(&self, key: &BlobKey) -> Result<DriverAttributes> {
        let head = self.client.head_object(&self.bucket, key.as_str())?;
        Ok(DriverAttributes {
            content_type: head.content_type.clone(),
            content_language: head.content_language.clone(),
            metadata: head.metadata.clone(),
            modified: head.last_modified,
            size: head.content_length,
            etag: Some(head.e_tag.clone()),
            native: Some(Arc::new(head)),
        })
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.client.delete_object(&self.bucket, key.as_str())
    }

    async fn list_paged(&self, opts: &ListOptions) -> Result<ListPage> {
        let (objects, next_page_token) = self.client.list_objects(
            &self.bucket,
            &opts.prefix,
            opts.page_token.as_deref(),
            opts.effective_page_size(),
        )?;
        Ok(ListPage {
            objects,
            next_page_token,
        })
    }

    fn as_native(&self) -> Option<&(dyn Any + Send + Sync)> {
        Some(&self.client)
    }
}

struct MemReader {
    attrs: ReaderAttributes,
    output: GetObjectOutput,
    body: Bytes,
}

#[async_trait]
impl DriverReader for MemReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.body.len());
        buf[..n].copy_from_slice(&self.body.split_to(n));
        Ok(n)
    }

    fn attributes(&self) -> &ReaderAttributes {
        &self.attrs
    }

    fn as_native(&self) -> Option<&(dyn Any + Send + Sync)> {
        Some(&self.output)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Buffers the whole upload and stores it in one put on close.
struct MemWriter {
    client: MemClient,
    input: PutObjectInput,
    if_match: Option<String>,
    buf: BytesMut,
}

#[async_trait]
impl DriverWriter for MemWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        let head = this
            .client
            .put_object(&this.input, this.buf.freeze(), this.if_match.as_deref())?;
        debug!(key = %this.input.key, size = head.content_length, "memblob put");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        debug!(key = %self.input.key, "memblob upload discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memblob::HeadObjectOutput;
    use cloudblob_common::ErrorCode;

    fn bucket() -> Bucket {
        let client = MemClient::new("local");
        client.create_bucket("b").unwrap();
        open_bucket(client, "b").unwrap()
    }

    #[test]
    fn test_open_missing_bucket() {
        let err = open_bucket(MemClient::default(), "nope").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let bucket = bucket();
        bucket
            .write_all("k", b"Hello, World!", "text/plain", WriterOptions::new())
            .await
            .unwrap();

        assert_eq!(bucket.read_all("k").await.unwrap(), b"Hello, World!");
        assert_eq!(bucket.attributes("k").await.unwrap().size, 13);
    }

    #[tokio::test]
    async fn test_before_write_sets_native_fields() {
        let bucket = bucket();
        let opts = WriterOptions::new().before_write(|probe| {
            let req = probe
                .get_mut::<PutObjectInput>()
                .ok_or_else(|| Error::Config("not a PutObjectInput".to_string()))?;
            req.content_language = Some("nl".to_string());
            req.cache_control = Some("no-cache".to_string());
            Ok(())
        });
        bucket.write_all("k", b"x", "text/plain", opts).await.unwrap();

        let attrs = bucket.attributes("k").await.unwrap();
        assert_eq!(attrs.content_language.as_deref(), Some("nl"));
        let head = attrs.as_native::<HeadObjectOutput>().unwrap();
        assert_eq!(head.cache_control.as_deref(), Some("no-cache"));

        let reader = bucket.new_reader("k").await.unwrap();
        let get = reader.as_native::<GetObjectOutput>().unwrap();
        assert_eq!(get.content_language.as_deref(), Some("nl"));
    }

    #[tokio::test]
    async fn test_portable_content_language_reaches_request() {
        let bucket = bucket();
        let opts = WriterOptions::new()
            .with_content_language("de")
            .before_write(|probe| {
                let req = probe
                    .get_mut::<PutObjectInput>()
                    .ok_or_else(|| Error::Config("not a PutObjectInput".to_string()))?;
                assert_eq!(req.content_language.as_deref(), Some("de"));
                Ok(())
            });
        bucket.write_all("k", b"x", "text/plain", opts).await.unwrap();

        let attrs = bucket.attributes("k").await.unwrap();
        assert_eq!(attrs.content_language.as_deref(), Some("de"));
    }

    #[tokio::test]
    async fn test_before_write_type_mismatch_fails_writer() {
        let bucket = bucket();
        let opts = WriterOptions::new().before_write(|probe| {
            probe
                .get_mut::<String>()
                .map(|_| ())
                .ok_or_else(|| Error::Config("expected String".to_string()))
        });
        let err = bucket.new_writer("k", "text/plain", opts).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Config);
        assert!(!bucket.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_writer_creates_nothing() {
        let bucket = bucket();
        let mut writer = bucket
            .new_writer("k", "text/plain", WriterOptions::new())
            .await
            .unwrap();
        writer.write(b"abc").await.unwrap();
        drop(writer);
        assert!(!bucket.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_and_if_match() {
        let bucket = bucket();
        bucket
            .write_all("k", b"1", "text/plain", WriterOptions::new().with_metadata("owner", "ops"))
            .await
            .unwrap();
        let attrs = bucket.attributes("k").await.unwrap();
        assert_eq!(attrs.metadata.get("owner").map(String::as_str), Some("ops"));

        let err = bucket
            .write_all("k", b"2", "text/plain", WriterOptions::new().with_if_match("bogus"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PreconditionFailed);

        let etag = attrs.etag.unwrap();
        bucket
            .write_all("k", b"2", "text/plain", WriterOptions::new().with_if_match(etag))
            .await
            .unwrap();
        assert_eq!(bucket.read_all("k").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_bucket_as_exposes_client() {
        let bucket = bucket();
        let client = bucket.as_native::<MemClient>().unwrap();
        assert_eq!(client.region(), "local");
        assert!(bucket.as_native::<String>().is_none());
    }

    #[test]
    fn test_create_memblob_driver_factory() {
        let driver = create_memblob_driver(serde_json::json!({ "bucket_name": "x" })).unwrap();
        assert_eq!(driver.name(), "memblob");
        assert!(create_memblob_driver(serde_json::json!({ "invalid": 1 })).is_err());
    }
}
