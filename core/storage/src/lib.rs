//! Portable blob storage for cloudblob.
//!
//! Application code talks to a [`Bucket`]; a [`Driver`] translates each call
//! to one provider. Provider-specific features stay reachable through typed
//! probes (`as_native`, `WriterOptions::before_write`) without the portable
//! API knowing any provider type.
//!
//! # Design Principles
//! - Driver isolation: no provider logic above the [`driver`] boundary
//! - Async operations: all I/O is async and cancellable
//! - Unified error semantics: drivers classify errors, the facade passes them on
//! - Escape hatch: probes miss quietly, they never fail an operation

pub mod attributes;
pub mod bucket;
pub mod driver;
pub mod fileblob;
pub mod list;
pub mod memblob;
pub mod probe;
pub mod reader;
pub mod registry;
pub mod writer;

pub use attributes::Attributes;
pub use bucket::{Bucket, DEFAULT_CONTENT_TYPE};
pub use driver::{
    Driver, DriverAttributes, DriverReader, DriverWriter, ListObject, ListOptions, ListPage,
    ReaderAttributes, DEFAULT_PAGE_SIZE,
};
pub use list::ListIter;
pub use probe::{Native, Probe, ProbeMut};
pub use reader::Reader;
pub use registry::{create_default_registry, DriverFactory, DriverRegistry};
pub use writer::{BeforeWriteFn, Writer, WriterOptions};

pub use cloudblob_common::{BlobKey, Error, ErrorCode, Result};
