//! Blobcache: a full-page HTTP response cache backed by blob storage.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
