//! Shared test utilities for the service fabric crates.
//!
//! This crate provides:
//! - Proptest generators for registry and auth domain types
//! - A span sink that records finished spans
//! - Test fixtures with sample data

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use fixtures::*;
pub use generators::*;
pub use mocks::RecordingSink;
