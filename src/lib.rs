//! Gameline Library
//!
//! Exposes the consolidation pipeline for use by the binary and integration tests.

pub mod consolidation;
