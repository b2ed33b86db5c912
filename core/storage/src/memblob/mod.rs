//! In-memory blob driver.
//!
//! memblob models a small object service living inside the process. It is
//! useful for tests and development, and it is the reference for how a driver
//! publishes provider-native types through the escape hatch:
//!
//! - `Bucket::as_native`: [`MemClient`]
//! - `WriterOptions::before_write`: [`PutObjectInput`]
//! - `Attributes::as_native`: [`HeadObjectOutput`]
//! - `Reader::as_native`: [`GetObjectOutput`]
//!
//! Uploads are buffered and stored in a single put on close. A writer that
//! is aborted, dropped or cancelled before close leaves no object behind.

pub mod client;
pub mod driver;

pub use client::{GetObjectOutput, HeadObjectOutput, MemClient, PutObjectInput};
pub use driver::{create_memblob_driver, open_bucket, MemBucket, MemblobConfig};
