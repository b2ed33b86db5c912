//! Conformance run for the in-memory driver.

use async_trait::async_trait;
use std::sync::Arc;

use cloudblob_drivertest::{init_tracing, run_conformance_tests, AsTest, Harness};
use cloudblob_storage::memblob::{
    self, GetObjectOutput, HeadObjectOutput, MemClient, MemblobConfig, PutObjectInput,
};
use cloudblob_storage::{Attributes, Bucket, ProbeMut, Reader, Result};

const LANGUAGE: &str = "nl";

struct MemHarness {
    client: MemClient,
    config: MemblobConfig,
}

impl MemHarness {
    async fn new() -> Result<Box<dyn Harness>> {
        let config = MemblobConfig {
            bucket_name: "cloudblob-bucket".to_string(),
            region: "us-east-2".to_string(),
        };
        let client = MemClient::new(config.region.clone());
        client.create_bucket(&config.bucket_name)?;
        Ok(Box::new(MemHarness { client, config }))
    }
}

#[async_trait]
impl Harness for MemHarness {
    async fn make_bucket(&mut self) -> Result<Bucket> {
        memblob::open_bucket(self.client.clone(), &self.config.bucket_name)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let bucket = &self.config.bucket_name;
        loop {
            let (objects, _) = self.client.list_objects(bucket, "", None, 1000)?;
            if objects.is_empty() {
                break;
            }
            for obj in objects {
                self.client.delete_object(bucket, obj.key.as_str())?;
            }
        }
        self.client.delete_bucket(bucket)
    }
}

/// Sets the content language through the native upload request and reads it
/// back from the native head and get responses.
struct VerifyContentLanguage;

impl AsTest for VerifyContentLanguage {
    fn name(&self) -> &str {
        "verify content language"
    }

    fn bucket_check(&self, bucket: &Bucket) -> anyhow::Result<()> {
        let client = bucket
            .as_native::<MemClient>()
            .ok_or_else(|| anyhow::anyhow!("bucket is not backed by a MemClient"))?;
        anyhow::ensure!(client.region() == "us-east-2", "unexpected region {}", client.region());
        Ok(())
    }

    fn before_write(&self, probe: &mut ProbeMut<'_>) -> anyhow::Result<()> {
        let req = probe
            .get_mut::<PutObjectInput>()
            .ok_or_else(|| anyhow::anyhow!("before_write probe is not a PutObjectInput"))?;
        req.content_language = Some(LANGUAGE.to_string());
        Ok(())
    }

    fn attributes_check(&self, attrs: &Attributes) -> anyhow::Result<()> {
        let head = attrs
            .as_native::<HeadObjectOutput>()
            .ok_or_else(|| anyhow::anyhow!("attributes probe is not a HeadObjectOutput"))?;
        anyhow::ensure!(
            head.content_language.as_deref() == Some(LANGUAGE),
            "head content language {:?}, expected {:?}",
            head.content_language,
            LANGUAGE
        );
        Ok(())
    }

    fn reader_check(&self, reader: &Reader) -> anyhow::Result<()> {
        let get = reader
            .as_native::<GetObjectOutput>()
            .ok_or_else(|| anyhow::anyhow!("reader probe is not a GetObjectOutput"))?;
        anyhow::ensure!(
            get.content_language.as_deref() == Some(LANGUAGE),
            "get content language {:?}, expected {:?}",
            get.content_language,
            LANGUAGE
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_memblob_conformance() {
    init_tracing();

    let as_tests: Vec<Arc<dyn AsTest>> = vec![Arc::new(VerifyContentLanguage)];
    let report = run_conformance_tests(MemHarness::new, "testdata", &as_tests)
        .await
        .unwrap();

    report.assert_passed();
    assert!(report.case("as/verify content language").is_some());
}

#[tokio::test]
async fn test_harness_close_removes_bucket() {
    let mut harness = MemHarness::new().await.unwrap();
    let bucket = harness.make_bucket().await.unwrap();
    bucket
        .write_all("a", b"1", "text/plain", Default::default())
        .await
        .unwrap();
    let client = bucket.as_native::<MemClient>().unwrap().clone();
    drop(bucket);

    harness.close().await.unwrap();
    assert!(!client.has_bucket("cloudblob-bucket"));
}
