//! Harness contract and the conformance runner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use cloudblob_storage::{Attributes, Bucket, Error, ProbeMut, Reader, Result};

use crate::cases::{Case, PORTABLE_CASES};
use crate::golden::{GoldenMode, GoldenStore, Snapshot};
use crate::report::{ConformanceReport, Outcome};

/// Provider-specific setup for a conformance run.
///
/// A fresh harness is created for every case and closed when the case ends.
#[async_trait]
pub trait Harness: Send {
    /// Build a bucket bound to the provider under test.
    async fn make_bucket(&mut self) -> Result<Bucket>;

    /// Release provider resources.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Provider-specific checks of the escape hatch.
///
/// Every registered hook is run on every conformance pass.
pub trait AsTest: Send + Sync {
    fn name(&self) -> &str;

    /// Probe the bucket-level client.
    fn bucket_check(&self, bucket: &Bucket) -> anyhow::Result<()>;

    /// Probe and mutate the native upload request.
    fn before_write(&self, probe: &mut ProbeMut<'_>) -> anyhow::Result<()>;

    /// Probe the native head response of the object written above.
    fn attributes_check(&self, attrs: &Attributes) -> anyhow::Result<()>;

    /// Probe the native get response of the object written above.
    fn reader_check(&self, reader: &Reader) -> anyhow::Result<()>;
}

/// Setup or teardown failure; aborts the whole run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("harness setup failed in case {case}: {source}")]
    Setup {
        case: String,
        #[source]
        source: Error,
    },

    #[error("harness teardown failed in case {case}: {source}")]
    Teardown {
        case: String,
        #[source]
        source: Error,
    },
}

/// Conformance run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceConfig {
    /// Directory of golden snapshots.
    pub golden_dir: PathBuf,
    #[serde(default)]
    pub golden_mode: GoldenMode,
}

impl ConformanceConfig {
    pub fn new(golden_dir: impl Into<PathBuf>) -> Self {
        Self {
            golden_dir: golden_dir.into(),
            golden_mode: GoldenMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: GoldenMode) -> Self {
        self.golden_mode = mode;
        self
    }
}

/// Run the portable battery plus one case per `as_tests` entry, replaying
/// golden snapshots from `golden_dir` where they exist.
///
/// # Preconditions
/// - Each call of `new_harness` must yield a harness whose buckets start empty
///
/// # Postconditions
/// - `close` has been called on every harness that was created
///
/// # Errors
/// Only harness setup or teardown failures; case failures are recorded in
/// the returned report.
pub async fn run_conformance_tests<F, Fut>(
    new_harness: F,
    golden_dir: impl AsRef<Path>,
    as_tests: &[Arc<dyn AsTest>],
) -> std::result::Result<ConformanceReport, HarnessError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Box<dyn Harness>>>,
{
    let config = ConformanceConfig::new(golden_dir.as_ref());
    run_conformance_tests_with(config, new_harness, as_tests).await
}

/// [`run_conformance_tests`] with explicit configuration.
pub async fn run_conformance_tests_with<F, Fut>(
    config: ConformanceConfig,
    new_harness: F,
    as_tests: &[Arc<dyn AsTest>],
) -> std::result::Result<ConformanceReport, HarnessError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Box<dyn Harness>>>,
{
    let golden = GoldenStore::new(config.golden_dir, config.golden_mode);
    let mut report = ConformanceReport::default();

    for (name, case) in PORTABLE_CASES {
        let outcome = run_case(&new_harness, &golden, name, Case::Portable(*case)).await?;
        report.push(*name, outcome);
    }
    for as_test in as_tests {
        let name = format!("as/{}", as_test.name());
        let outcome = run_case(&new_harness, &golden, &name, Case::As(as_test.clone())).await?;
        report.push(name, outcome);
    }

    info!(
        cases = report.cases.len(),
        failed = report.failures().len(),
        "conformance run finished"
    );
    Ok(report)
}

async fn run_case<F, Fut>(
    new_harness: &F,
    golden: &GoldenStore,
    name: &str,
    case: Case,
) -> std::result::Result<Outcome, HarnessError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Box<dyn Harness>>>,
{
    let span = info_span!("conformance_case", case = name);
    async move {
        let mut harness = new_harness().await.map_err(|source| HarnessError::Setup {
            case: name.to_string(),
            source,
        })?;
        let bucket = match harness.make_bucket().await {
            Ok(bucket) => bucket,
            Err(source) => {
                if let Err(err) = harness.close().await {
                    warn!(error = %err, "teardown after failed setup also failed");
                }
                return Err(HarnessError::Setup {
                    case: name.to_string(),
                    source,
                });
            }
        };

        let mut snapshot = Snapshot::default();
        let mut result = case.execute(&bucket, &mut snapshot).await;
        if result.is_ok() {
            result = golden.check(name, &snapshot).await;
        }
        drop(bucket);

        harness.close().await.map_err(|source| HarnessError::Teardown {
            case: name.to_string(),
            source,
        })?;

        Ok(match result {
            Ok(()) => Outcome::Passed,
            Err(err) => {
                let msg = format!("{:#}", err);
                warn!(error = %msg, "case failed");
                Outcome::Failed(msg)
            }
        })
    }
    .instrument(span)
    .await
}
