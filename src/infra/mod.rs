//! Infrastructure adapters and runtime bootstrap.

pub mod blob_fs;
pub mod error;
pub mod http;
pub mod telemetry;
