//! Double-buffered transfer engine for twinbuf
//!
//! This crate moves bulk data between a file and memory, or between two
//! files, overlapping one I/O operation with another:
//!
//! - **Blocking primitives**: positional `read_exact`/`write_exact` that retry
//!   interrupted calls and never move a file cursor
//! - **Handshake**: two aligned slots with a lock-free ownership protocol
//! - **Pipelines**: async read, write and copy, each one producer and one
//!   consumer thread
//! - **Baselines**: single-buffer, memory-mapped, `sendfile` and `splice`
//!   transfers, plus a one-thread double-buffered read over POSIX AIO
//! - **Hints**: direct I/O, sequential advice, preallocation, cache purge
//!
//! # Examples
//!
//! ```rust,no_run
//! use twinbuf_io::{count_needles, open_read, OpenHints, PipelineOptions};
//! use twinbuf_types::{BufferSize, NEEDLE};
//!
//! # fn example() -> twinbuf_types::Result<()> {
//! let file = open_read("data/test_64.bin", OpenHints::cached())?;
//! let options = PipelineOptions::new(BufferSize::from_kib(256).unwrap());
//! let needles = count_needles(&file, options, NEEDLE)?;
//! println!("Found {} needles", needles);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod aio;
pub mod blocking;
pub mod buffer;
pub mod data;
pub mod handshake;
pub mod hints;
pub mod mapped;
pub mod pipeline;
pub mod plain;
pub mod verify;
pub mod zero_copy;


pub use blocking::{file_len, open_read, open_write, read_exact, write_exact, PositionalFile};
pub use buffer::AlignedBuffer;
pub use handshake::{Consumer, DoubleBuffer, Flow, Producer, SlotState};
pub use hints::{advise_sequential, check_direct, preallocate, purge_cache, truncate, OpenHints};
pub use pipeline::{
    count_default_needles, count_needles, tally, AsyncCopy, AsyncRead, AsyncWrite,
    PipelineOptions,
};
pub use verify::{count_reference, expect_count};
pub use zero_copy::{copy_sendfile, copy_splice};
