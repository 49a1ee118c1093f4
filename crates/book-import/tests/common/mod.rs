//! Shared test utilities for book-import integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated jobs backed by a temp directory
//! - Fixture builders that write EPUB and DOCX archives in memory

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{TestHarness, PUBLIC_BASE_URL};
