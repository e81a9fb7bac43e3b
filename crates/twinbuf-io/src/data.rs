//! Random test data generation

use crate::blocking::{open_write, write_exact};
use crate::hints::OpenHints;
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::info;
use twinbuf_types::Result;

/// Block size used when generating data files
pub const BLOCK_SIZE: usize = 64 * 1024;

/// File sizes, in MiB, produced by `make-data` by default
pub const DEFAULT_SIZES_MIB: &[u64] = &[
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640,
    768, 896, 1024,
];

/// Fill `buf` with uniformly distributed random bytes
pub fn fill_random(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Conventional data file name for a size in MiB, e.g. `test_64.bin`
pub fn data_file_name(size_mib: u64) -> String {
    format!("test_{}.bin", size_mib)
}

/// Path of the data file for `size_mib` inside `dir`
pub fn data_file_path<P: AsRef<Path>>(dir: P, size_mib: u64) -> PathBuf {
    dir.as_ref().join(data_file_name(size_mib))
}

/// Write `len` random bytes to `path`, reporting progress after every block
pub fn make_file<P, F>(path: P, len: u64, mut on_progress: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(u64),
{
    let path = path.as_ref();
    let file = open_write(path, OpenHints::cached())?;
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut offset = 0u64;

    while offset < len {
        #[allow(clippy::cast_possible_truncation)]
        let n = (len - offset).min(BLOCK_SIZE as u64) as usize;
        fill_random(&mut block[..n]);
        write_exact(&file, &block[..n], offset)?;
        offset += n as u64;
        on_progress(offset);
    }

    file.sync_all()
        .map_err(|e| twinbuf_types::Error::system("fsync", &e))?;
    info!("Created '{}' ({} bytes)", path.display(), len);
    Ok(())
}
