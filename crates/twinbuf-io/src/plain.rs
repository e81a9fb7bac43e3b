//! Single-buffer, single-thread baselines
//!
//! Same contracts as the pipelines in [`crate::pipeline`], with every read and
//! write done in turn on the calling thread.

use crate::blocking::{read_exact, write_exact, PositionalFile};
use crate::buffer::AlignedBuffer;
use crate::pipeline::PipelineOptions;
use std::time::Instant;
use tracing::debug;
use twinbuf_types::{Result, TransferStats};

/// Read `file` to EOF, passing each chunk to `sink`
pub fn read<F, S>(file: &F, options: PipelineOptions, mut sink: S) -> Result<TransferStats>
where
    F: PositionalFile + ?Sized,
    S: FnMut(&[u8]) -> Result<()>,
{
    let start = Instant::now();
    let mut buffer = AlignedBuffer::new(options.capacity, options.alignment)?;
    let mut stats = TransferStats::new();

    loop {
        let n = read_exact(file, buffer.as_mut_slice(), stats.bytes)?;
        sink(&buffer.as_slice()[..n])?;
        stats.bytes += n as u64;
        stats.chunks += 1;
        if n < buffer.len() {
            break;
        }
    }

    stats.duration = start.elapsed();
    debug!("Plain read: {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

/// Write exactly `total` bytes produced by `fill`
pub fn write<F, G>(file: &F, options: PipelineOptions, total: u64, mut fill: G) -> Result<TransferStats>
where
    F: PositionalFile + ?Sized,
    G: FnMut(&mut [u8]) -> Result<()>,
{
    let start = Instant::now();
    let mut buffer = AlignedBuffer::new(options.capacity, options.alignment)?;
    let mut stats = TransferStats::new();

    while stats.bytes < total {
        #[allow(clippy::cast_possible_truncation)]
        let len = (total - stats.bytes).min(buffer.len() as u64) as usize;
        let chunk = &mut buffer.as_mut_slice()[..len];
        fill(chunk)?;
        write_exact(file, chunk, stats.bytes)?;
        stats.bytes += len as u64;
        stats.chunks += 1;
    }

    stats.duration = start.elapsed();
    debug!("Plain write: {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

/// Copy `src` to EOF into `dst` at the same offsets
pub fn copy<S, D>(src: &S, dst: &D, options: PipelineOptions) -> Result<TransferStats>
where
    S: PositionalFile + ?Sized,
    D: PositionalFile + ?Sized,
{
    let start = Instant::now();
    let mut buffer = AlignedBuffer::new(options.capacity, options.alignment)?;
    let mut stats = TransferStats::new();

    loop {
        let n = read_exact(src, buffer.as_mut_slice(), stats.bytes)?;
        write_exact(dst, &buffer.as_slice()[..n], stats.bytes)?;
        stats.bytes += n as u64;
        stats.chunks += 1;
        if n < buffer.len() {
            break;
        }
    }

    stats.duration = start.elapsed();
    debug!("Plain copy: {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::{open_read, open_write};
    use crate::hints::OpenHints;
    use crate::pipeline::tally;
    use tempfile::tempdir;
    use twinbuf_types::{BufferSize, NEEDLE};

    fn options(capacity: usize) -> PipelineOptions {
        PipelineOptions::new(BufferSize::new(capacity).unwrap())
    }

    #[test]
    fn test_plain_read_counts_needles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        let mut data = vec![0u8; 1000];
        data[0] = NEEDLE;
        data[999] = NEEDLE;
        std::fs::write(&path, &data).unwrap();

        let file = open_read(&path, OpenHints::cached()).unwrap();
        let mut count = 0;
        let stats = read(&file, options(128), |chunk| {
            count += tally(chunk, NEEDLE);
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 2);
        assert_eq!(stats.bytes, 1000);
        assert_eq!(stats.chunks, 8);
    }

    #[test]
    fn test_plain_write_and_copy() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.bin");
        let dst_path = dir.path().join("dst.bin");

        let src = open_write(&src_path, OpenHints::cached()).unwrap();
        let mut next = 0u8;
        let stats = write(&src, options(100), 1050, |buf| {
            for b in buf.iter_mut() {
                *b = next;
                next = next.wrapping_add(1);
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(stats.bytes, 1050);
        assert_eq!(stats.chunks, 11);

        let dst = open_write(&dst_path, OpenHints::cached()).unwrap();
        let stats = copy(&src, &dst, options(100)).unwrap();
        assert_eq!(stats.bytes, 1050);
        assert_eq!(std::fs::read(&src_path).unwrap(), std::fs::read(&dst_path).unwrap());
    }

    #[test]
    fn test_plain_write_zero_bytes() {
        let dir = tempdir().unwrap();
        let file = open_write(dir.path().join("zero.bin"), OpenHints::cached()).unwrap();
        let stats = write(&file, options(64), 0, |_| panic!("nothing to fill")).unwrap();
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.chunks, 0);
    }
}
