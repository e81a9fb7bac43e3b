//! Core type system and error handling for twinbuf
//!
//! This crate provides the error taxonomy and the shared data structures used
//! by the double-buffered transfer engine and its benchmark harness:
//!
//! - **Error handling**: one error enum with kinds, severity levels and a merge
//!   rule for two-thread sessions
//! - **Configuration**: validated buffer sizes, alignments and trial counts
//! - **Core types**: transfer statistics, the method catalog and trial summaries
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use twinbuf_types::{BufferSize, Error, Result, TransferStats};
//!
//! fn example_operation() -> Result<TransferStats> {
//!     let capacity = BufferSize::from_kib(64).map_err(Error::config)?;
//!     let mut stats = TransferStats::new();
//!     stats.bytes = capacity.get() as u64;
//!     stats.chunks = 1;
//!     Ok(stats)
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use config::{Alignment, BufferSize, TrialCount, WaitStrategy};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use types::*;
