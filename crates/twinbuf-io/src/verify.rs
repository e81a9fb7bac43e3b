//! Ground-truth needle counting for read trials

use crate::blocking::open_read;
use crate::hints::OpenHints;
use crate::pipeline::{tally, PipelineOptions};
use crate::plain;
use std::path::Path;
use tracing::debug;
use twinbuf_types::{BufferSize, Error, Result};

/// Buffer size of the reference pass
pub const REFERENCE_BUFFER: usize = 64 * 1024;

/// Count `needle` in the file at `path` with a plain 64 KiB cached read
pub fn count_reference<P: AsRef<Path>>(path: P, needle: u8) -> Result<u64> {
    let path = path.as_ref();
    let file = open_read(path, OpenHints::cached())?;
    let capacity = BufferSize::new(REFERENCE_BUFFER).map_err(Error::config)?;

    let mut count = 0;
    plain::read(&file, PipelineOptions::new(capacity), |chunk| {
        count += tally(chunk, needle);
        Ok(())
    })?;

    debug!("Reference count for '{}': {}", path.display(), count);
    Ok(count)
}

/// Fail with [`Error::CountMismatch`] unless both counts agree
pub fn expect_count(expected: u64, actual: u64) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::CountMismatch { expected, actual })
    }
}
