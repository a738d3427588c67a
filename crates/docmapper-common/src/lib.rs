//! Common utilities for docmapper
//!
//! This crate provides the error type shared by the docmapper crates.

pub mod error;

pub use error::{DocMapperError, Result};
