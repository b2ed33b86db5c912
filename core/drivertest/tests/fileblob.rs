//! Conformance run for the local directory driver.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use cloudblob_drivertest::{init_tracing, run_conformance_tests, AsTest, Harness};
use cloudblob_storage::fileblob::{self, FileBucket};
use cloudblob_storage::memblob::{GetObjectOutput, HeadObjectOutput, MemClient, PutObjectInput};
use cloudblob_storage::{Attributes, Bucket, Error, ProbeMut, Reader, Result};

struct FileHarness {
    dir: TempDir,
}

impl FileHarness {
    async fn new() -> Result<Box<dyn Harness>> {
        let dir = TempDir::new().map_err(|e| Error::from_io(e, "temp dir"))?;
        Ok(Box::new(FileHarness { dir }))
    }
}

#[async_trait]
impl Harness for FileHarness {
    async fn make_bucket(&mut self) -> Result<Bucket> {
        fileblob::open_bucket(self.dir.path())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let path = self.dir.path().display().to_string();
        self.dir.close().map_err(|e| Error::from_io(e, path))
    }
}

/// fileblob publishes no native types, so every probe must miss quietly.
struct ProbesMiss;

impl AsTest for ProbesMiss {
    fn name(&self) -> &str {
        "probes miss"
    }

    fn bucket_check(&self, bucket: &Bucket) -> anyhow::Result<()> {
        anyhow::ensure!(bucket.as_native::<MemClient>().is_none(), "bucket probe hit MemClient");
        anyhow::ensure!(bucket.as_native::<FileBucket>().is_none(), "bucket probe hit FileBucket");
        Ok(())
    }

    fn before_write(&self, probe: &mut ProbeMut<'_>) -> anyhow::Result<()> {
        anyhow::ensure!(
            probe.get_mut::<PutObjectInput>().is_none(),
            "before_write probe hit PutObjectInput"
        );
        Ok(())
    }

    fn attributes_check(&self, attrs: &Attributes) -> anyhow::Result<()> {
        anyhow::ensure!(
            attrs.as_native::<HeadObjectOutput>().is_none(),
            "attributes probe hit HeadObjectOutput"
        );
        anyhow::ensure!(attrs.content_type == "text/plain", "content type {}", attrs.content_type);
        Ok(())
    }

    fn reader_check(&self, reader: &Reader) -> anyhow::Result<()> {
        anyhow::ensure!(
            reader.as_native::<GetObjectOutput>().is_none(),
            "reader probe hit GetObjectOutput"
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_fileblob_conformance() {
    init_tracing();

    let as_tests: Vec<Arc<dyn AsTest>> = vec![Arc::new(ProbesMiss)];
    let report = run_conformance_tests(FileHarness::new, "testdata", &as_tests)
        .await
        .unwrap();

    report.assert_passed();
    assert_eq!(report.failures().len(), 0);
}
