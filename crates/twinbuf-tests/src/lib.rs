//! twinbuf integration test support
//!
//! Shared helpers for the cross-crate tests in `tests/`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Data patterns and scratch files used across all integration tests.
pub mod test_utils;
