//! Memory-mapped baselines

use crate::hints::preallocate;
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::time::Instant;
use tracing::debug;
use twinbuf_types::{Error, Result, TransferStats};

fn map_read(file: &File, len: u64) -> Result<Mmap> {
    let len = usize::try_from(len)
        .map_err(|_| Error::config(format!("File of {} bytes cannot be mapped", len)))?;

    // SAFETY: the mapping is private to this call and the benchmark owns the
    // file, so nothing truncates it while the map is alive.
    unsafe { MmapOptions::new().len(len).map(file) }.map_err(|e| Error::system("mmap", &e))
}

fn map_write(file: &File, len: u64) -> Result<MmapMut> {
    let len = usize::try_from(len)
        .map_err(|_| Error::config(format!("File of {} bytes cannot be mapped", len)))?;

    // SAFETY: as in `map_read`; the file was opened read-write and sized first.
    unsafe { MmapOptions::new().len(len).map_mut(file) }.map_err(|e| Error::system("mmap", &e))
}

/// Map `file` read-only and pass its whole contents to `sink` once
pub fn read<S>(file: &File, mut sink: S) -> Result<TransferStats>
where
    S: FnMut(&[u8]) -> Result<()>,
{
    let start = Instant::now();
    let len = file.metadata().map_err(|e| Error::system("fstat", &e))?.len();

    // Zero-length mappings are rejected by the kernel
    if len == 0 {
        sink(&[])?;
    } else {
        let map = map_read(file, len)?;
        #[cfg(unix)]
        if let Err(e) = map.advise(memmap2::Advice::Sequential) {
            debug!("madvise(SEQUENTIAL) refused: {}", e);
        }
        sink(&map[..])?;
    }

    let stats = TransferStats {
        bytes: len,
        chunks: 1,
        worker_spawned: false,
        duration: start.elapsed(),
    };
    debug!("Mapped read: {} bytes", stats.bytes);
    Ok(stats)
}

/// Size `file` to `total` bytes, map it writable and let `fill` populate it
pub fn write<G>(file: &File, total: u64, fill: G) -> Result<TransferStats>
where
    G: FnOnce(&mut [u8]) -> Result<()>,
{
    let start = Instant::now();
    preallocate(file, total)?;

    if total > 0 {
        let mut map = map_write(file, total)?;
        fill(&mut map[..])?;
        map.flush().map_err(|e| Error::system("msync", &e))?;
    }

    let stats = TransferStats {
        bytes: total,
        chunks: 1,
        worker_spawned: false,
        duration: start.elapsed(),
    };
    debug!("Mapped write: {} bytes", stats.bytes);
    Ok(stats)
}

/// Copy `src` into `dst` through two mappings
pub fn copy(src: &File, dst: &File) -> Result<TransferStats> {
    let start = Instant::now();
    let len = src.metadata().map_err(|e| Error::system("fstat", &e))?.len();
    preallocate(dst, len)?;

    if len > 0 {
        let from = map_read(src, len)?;
        let mut to = map_write(dst, len)?;
        to.copy_from_slice(&from[..]);
        to.flush().map_err(|e| Error::system("msync", &e))?;
    }

    let stats = TransferStats {
        bytes: len,
        chunks: 1,
        worker_spawned: false,
        duration: start.elapsed(),
    };
    debug!("Mapped copy: {} bytes", stats.bytes);
    Ok(stats)
}
