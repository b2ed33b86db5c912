//! Conformance suite for cloudblob drivers.
//!
//! A provider supplies a [`Harness`] that builds buckets against it, plus
//! any number of [`AsTest`] hooks exercising its native types. The runner
//! puts every bucket through the same portable battery and returns a
//! [`ConformanceReport`]:
//!
//! ```ignore
//! let report = run_conformance_tests(new_harness, "testdata", &[]).await?;
//! report.assert_passed();
//! ```

pub mod cases;
pub mod golden;
pub mod harness;
pub mod logging;
pub mod report;

pub use cases::portable_case_names;
pub use golden::{GoldenMode, GoldenStore, Snapshot};
pub use harness::{
    run_conformance_tests, run_conformance_tests_with, AsTest, ConformanceConfig, Harness,
    HarnessError,
};
pub use logging::init_tracing;
pub use report::{CaseResult, ConformanceReport, Outcome};
