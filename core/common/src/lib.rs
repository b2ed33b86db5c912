//! Common utilities and types shared across cloudblob crates.
//!
//! This module provides the error taxonomy every driver classifies into
//! and the key type used to address blobs.

pub mod error;
pub mod types;

pub use error::{BoxError, Error, ErrorCode, Result};
pub use types::BlobKey;
