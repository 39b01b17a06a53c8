//! Application-level error reporting shared by the HTTP surfaces.

pub mod error;
