//! Unified test utilities for twinbuf tests

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use twinbuf_io::data::fill_random;
use twinbuf_types::NEEDLE;

/// Test data generation patterns
#[derive(Debug, Clone, Copy)]
pub enum TestDataPattern {
    /// All zeros, no needles
    Zeros,
    /// Every byte is the needle
    Needles,
    /// Uniformly random bytes
    Random,
    /// Byte `i` is `i % 256`, one needle every 256 bytes
    Counting,
}

/// Generate `size` bytes following `pattern`
pub fn generate_test_data(size: usize, pattern: TestDataPattern) -> Vec<u8> {
    match pattern {
        TestDataPattern::Zeros => vec![0u8; size],
        TestDataPattern::Needles => vec![NEEDLE; size],
        TestDataPattern::Random => {
            let mut data = vec![0u8; size];
            fill_random(&mut data);
            data
        }
        TestDataPattern::Counting => (0..size).map(|i| (i % 256) as u8).collect(),
    }
}

/// Number of needle bytes in `data`
pub fn count_needles_in(data: &[u8]) -> u64 {
    data.iter().filter(|&&b| b == NEEDLE).count() as u64
}

/// Create a file in `temp_dir` holding `data`
pub fn create_file_with(temp_dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let file_path = temp_dir.path().join(name);
    fs::write(&file_path, data).expect("Failed to write test file");
    file_path
}

/// Create a file in `temp_dir` with `size` bytes of `pattern`
pub fn create_test_file(
    temp_dir: &TempDir,
    name: &str,
    size: usize,
    pattern: TestDataPattern,
) -> PathBuf {
    create_file_with(temp_dir, name, &generate_test_data(size, pattern))
}

/// Common file sizes for tests
pub struct CommonFileSizes;

impl CommonFileSizes {
    /// One 4 KiB page
    pub const PAGE: usize = 4 * 1024;
    /// Default slot capacity
    pub const SLOT: usize = 64 * 1024;
    /// 1 MiB
    pub const LARGE: usize = 1024 * 1024;
    /// 10 MiB
    pub const XLARGE: usize = 10 * 1024 * 1024;
}
