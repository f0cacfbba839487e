//! Common utilities and abstractions for the shards project.
//!
//! This crate provides the shared error type and the durable storage
//! abstraction used by the collection engine.

pub mod error;
pub mod storage;

pub use error::{CommonError, Diagnose, ErrorCategory, Result};
pub use storage::{Storage, StorageBackend, StorageBuilder, StorageStats};
