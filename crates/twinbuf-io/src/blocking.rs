//! Blocking positional I/O primitives
//!
//! Every call takes an explicit offset and never moves a file cursor, so two
//! threads may work on disjoint ranges of the same handle.

use crate::hints::{open_with_hints, OpenHints};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use twinbuf_types::{Error, Result};

/// A file that supports reads and writes at explicit offsets.
///
/// Implemented for [`std::fs::File`]; tests implement it for wrappers that
/// inject faults.
pub trait PositionalFile {
    /// Read up to `buf.len()` bytes starting at `offset`
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes starting at `offset`
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Current length of the file in bytes
    fn len(&self) -> io::Result<u64>;
}

impl PositionalFile for File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }
}

impl<T: PositionalFile + ?Sized> PositionalFile for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        (**self).len()
    }
}

/// Fill `buf` from `offset`, stopping early only at end of file.
///
/// Returns the number of bytes read; fewer than `buf.len()` means EOF.
pub fn read_exact<F: PositionalFile + ?Sized>(file: &F, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::system("pread", &e)),
        }
    }
    Ok(filled)
}

/// Write all of `buf` at `offset`.
///
/// A write that makes no progress fails with [`Error::ShortWrite`].
pub fn write_exact<F: PositionalFile + ?Sized>(file: &F, buf: &[u8], offset: u64) -> Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match file.write_at(&buf[written..], offset + written as u64) {
            Ok(0) => {
                return Err(Error::ShortWrite {
                    expected: buf.len(),
                    written,
                    offset,
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::system("pwrite", &e)),
        }
    }
    Ok(written)
}

/// Open an existing file for reading
pub fn open_read<P: AsRef<Path>>(path: P, hints: OpenHints) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    open_retrying(&options, path.as_ref(), hints)
}

/// Create or truncate a file for writing
pub fn open_write<P: AsRef<Path>>(path: P, hints: OpenHints) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(true);
    open_retrying(&options, path.as_ref(), hints)
}

/// Length of the file behind `file`
pub fn file_len<F: PositionalFile + ?Sized>(file: &F) -> Result<u64> {
    file.len().map_err(|e| Error::system("fstat", &e))
}

fn open_retrying(options: &OpenOptions, path: &Path, hints: OpenHints) -> Result<File> {
    loop {
        match open_with_hints(options, path, hints) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::System {
                    operation: format!("open '{}'", path.display()),
                    code: e.raw_os_error(),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;
    use twinbuf_types::ErrorKind;

    /// Returns `Interrupted` once, then delivers at most `step` bytes per call
    struct Choppy {
        data: Vec<u8>,
        step: usize,
        interrupted: Cell<bool>,
    }

    impl PositionalFile for Choppy {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            if !self.interrupted.replace(true) {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let start = (offset as usize).min(self.data.len());
            let n = buf.len().min(self.step).min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn write_at(&self, buf: &[u8], _offset: u64) -> io::Result<usize> {
            if !self.interrupted.replace(true) {
                return Err(io::ErrorKind::Interrupted.into());
            }
            Ok(buf.len().min(self.step))
        }

        fn len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }
    }

    struct Full;

    impl PositionalFile for Full {
        fn read_at(&self, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            Ok(0)
        }

        fn write_at(&self, _buf: &[u8], _offset: u64) -> io::Result<usize> {
            Ok(0)
        }

        fn len(&self) -> io::Result<u64> {
            Ok(0)
        }
    }

    struct Broken;

    impl PositionalFile for Broken {
        fn read_at(&self, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(5))
        }

        fn write_at(&self, _buf: &[u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(28))
        }

        fn len(&self) -> io::Result<u64> {
            Err(io::Error::from_raw_os_error(9))
        }
    }

    #[test]
    fn test_read_exact_loops_and_retries() {
        let file = Choppy {
            data: (0..100u8).collect(),
            step: 7,
            interrupted: Cell::new(false),
        };
        let mut buf = [0u8; 40];
        assert_eq!(read_exact(&file, &mut buf, 10).unwrap(), 40);
        assert_eq!(buf[0], 10);
        assert_eq!(buf[39], 49);
    }

    #[test]
    fn test_read_exact_stops_at_eof() {
        let file = Choppy {
            data: vec![1; 30],
            step: 8,
            interrupted: Cell::new(true),
        };
        let mut buf = [0u8; 64];
        assert_eq!(read_exact(&file, &mut buf, 0).unwrap(), 30);
        assert_eq!(read_exact(&file, &mut buf, 30).unwrap(), 0);
    }

    #[test]
    fn test_write_exact_loops_and_retries() {
        let file = Choppy {
            data: Vec::new(),
            step: 3,
            interrupted: Cell::new(false),
        };
        assert_eq!(write_exact(&file, &[9u8; 20], 0).unwrap(), 20);
    }

    #[test]
    fn test_write_exact_zero_progress_is_short_write() {
        let error = write_exact(&Full, &[1u8; 16], 4096).unwrap_err();
        match error {
            Error::ShortWrite {
                expected,
                written,
                offset,
            } => {
                assert_eq!(expected, 16);
                assert_eq!(written, 0);
                assert_eq!(offset, 4096);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_os_errors_keep_their_code() {
        let mut buf = [0u8; 4];
        let error = read_exact(&Broken, &mut buf, 0).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::System);
        assert_eq!(error.raw_os_error(), Some(5));

        let error = write_exact(&Broken, &buf, 0).unwrap_err();
        assert_eq!(error.raw_os_error(), Some(28));

        assert_eq!(file_len(&Broken).unwrap_err().raw_os_error(), Some(9));
    }

    #[test]
    fn test_empty_buffers_are_noops() {
        assert_eq!(read_exact(&Broken, &mut [], 0).unwrap(), 0);
        assert_eq!(write_exact(&Broken, &[], 0).unwrap(), 0);
    }

    #[test]
    fn test_real_file_positional_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positional.bin");

        let file = open_write(&path, OpenHints::cached()).unwrap();
        write_exact(&file, b"world", 6).unwrap();
        write_exact(&file, b"hello ", 0).unwrap();
        assert_eq!(file_len(&file).unwrap(), 11);
        drop(file);

        let file = open_read(&path, OpenHints::cached()).unwrap();
        let mut buf = [0u8; 11];
        read_exact(&file, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn test_open_missing_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        let error = open_read(&path, OpenHints::cached()).unwrap_err();
        assert!(error.to_string().contains("missing.bin"));
        assert!(error.raw_os_error().is_some());
    }
}
