//! Operating system hints applied around a transfer
//!
//! Every function here is best effort where the platform lacks the facility:
//! unsupported hints degrade to a plain operation and log at `warn` or `debug`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use twinbuf_types::{Alignment, BufferSize, Error, Result};

/// Flags applied when a file is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenHints {
    /// Bypass the page cache (`O_DIRECT`, `F_NOCACHE`)
    pub direct: bool,
    /// Do not update the access time on reads (`O_NOATIME`)
    pub no_atime: bool,
}

impl OpenHints {
    /// Hints for a cached open
    pub const fn cached() -> Self {
        Self {
            direct: false,
            no_atime: false,
        }
    }

    /// Hints for an uncached open
    pub const fn direct() -> Self {
        Self {
            direct: true,
            no_atime: false,
        }
    }
}

/// Reject a direct-I/O capacity that the kernel would refuse mid-transfer
pub fn check_direct(capacity: BufferSize, alignment: Alignment) -> Result<()> {
    if capacity.is_multiple_of(alignment) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "Direct I/O needs a buffer size that is a multiple of {} bytes, got {}",
            alignment.get(),
            capacity.get()
        )))
    }
}

/// Open `path` with `options`, applying `hints`.
///
/// Filesystems that refuse `O_DIRECT` or `O_NOATIME` get a plain open instead.
pub(crate) fn open_with_hints(
    options: &OpenOptions,
    path: &Path,
    hints: OpenHints,
) -> io::Result<File> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use std::os::unix::fs::OpenOptionsExt;

        let mut flags = 0;
        if hints.direct {
            flags |= libc::O_DIRECT;
        }
        if hints.no_atime {
            flags |= libc::O_NOATIME;
        }
        if flags != 0 {
            let mut hinted = options.clone();
            hinted.custom_flags(flags);
            match hinted.open(path) {
                Ok(file) => return Ok(file),
                Err(error) => match error.raw_os_error() {
                    Some(libc::EPERM | libc::EACCES | libc::EINVAL | libc::ENOTSUP | libc::EROFS) => {
                        warn!(
                            "Open flags {:#x} refused for '{}' ({}), opening without them",
                            flags,
                            path.display(),
                            error
                        );
                    }
                    _ => return Err(error),
                },
            }
        }
        options.open(path)
    }

    #[cfg(target_os = "macos")]
    {
        use std::os::unix::io::AsRawFd;

        let file = options.open(path)?;
        if hints.direct {
            // SAFETY: fd is valid for the lifetime of `file`
            let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
            if rc == -1 {
                warn!(
                    "F_NOCACHE refused for '{}': {}",
                    path.display(),
                    io::Error::last_os_error()
                );
            }
        }
        Ok(file)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    {
        if hints.direct || hints.no_atime {
            debug!("Open hints {:?} not available on this platform", hints);
        }
        options.open(path)
    }
}

/// Tell the kernel the first `len` bytes of `file` will be read once, in order
pub fn advise_sequential(file: &File, len: u64) -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        let len = libc::off_t::try_from(len).unwrap_or(0);
        for advice in [libc::POSIX_FADV_NOREUSE, libc::POSIX_FADV_SEQUENTIAL] {
            // SAFETY: fd is valid for the lifetime of `file`
            let rc = unsafe { libc::posix_fadvise(fd, 0, len, advice) };
            if rc != 0 {
                return Err(Error::system(
                    "posix_fadvise",
                    &io::Error::from_raw_os_error(rc),
                ));
            }
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    {
        use std::os::unix::io::AsRawFd;

        let _ = len;
        // SAFETY: fd is valid for the lifetime of `file`
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_RDAHEAD, 1) };
        if rc == -1 {
            return Err(Error::system("fcntl(F_RDAHEAD)", &io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    {
        let _ = (file, len);
        debug!("Sequential access advice not available on this platform");
        Ok(())
    }
}

/// Reserve `len` bytes of storage for `file` and extend it to that size
pub fn preallocate(file: &File, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    if i64::try_from(len).is_err() {
        return Err(Error::config(format!(
            "Preallocation size {} exceeds platform limit",
            len
        )));
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use std::os::unix::io::AsRawFd;

        #[allow(clippy::cast_possible_wrap)]
        let size = len as libc::off_t;
        // SAFETY: fd is valid for the lifetime of `file`
        let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size) };
        match rc {
            0 => Ok(()),
            libc::EOPNOTSUPP | libc::ENOSYS | libc::EINVAL => {
                debug!("posix_fallocate unsupported, extending with set_len");
                truncate(file, len)
            }
            code => Err(Error::system(
                "posix_fallocate",
                &io::Error::from_raw_os_error(code),
            )),
        }
    }

    #[cfg(target_os = "macos")]
    {
        use std::os::unix::io::AsRawFd;

        #[allow(clippy::cast_possible_wrap)]
        let size = len as libc::off_t;
        let mut store = libc::fstore_t {
            fst_flags: libc::F_ALLOCATECONTIG,
            fst_posmode: libc::F_PEOFPOSMODE,
            fst_offset: 0,
            fst_length: size,
            fst_bytesalloc: 0,
        };
        let fd = file.as_raw_fd();
        // SAFETY: fd is valid and `store` outlives both calls
        let mut rc = unsafe { libc::fcntl(fd, libc::F_PREALLOCATE, &mut store as *mut libc::fstore_t) };
        if rc == -1 {
            store.fst_flags = libc::F_ALLOCATEALL;
            // SAFETY: as above
            rc = unsafe { libc::fcntl(fd, libc::F_PREALLOCATE, &mut store as *mut libc::fstore_t) };
        }
        if rc == -1 {
            debug!(
                "F_PREALLOCATE refused ({}), extending with set_len",
                io::Error::last_os_error()
            );
        }
        truncate(file, len)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    {
        truncate(file, len)
    }
}

/// Set the length of `file` to exactly `len` bytes
pub fn truncate(file: &File, len: u64) -> Result<()> {
    file.set_len(len)
        .map_err(|e| Error::system("set_len", &e))
}

/// Flush dirty pages and drop the page cache so the next trial starts cold.
///
/// Needs root on Linux. Callers treat failure as a warning.
pub fn purge_cache() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        run_command("sync", &[])?;
        std::fs::write("/proc/sys/vm/drop_caches", b"3")
            .map_err(|e| Error::system("write /proc/sys/vm/drop_caches", &e))
    }

    #[cfg(target_os = "macos")]
    {
        run_command("purge", &[])
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(Error::unsupported("purge page cache"))
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn run_command(program: &str, args: &[&str]) -> Result<()> {
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::system(program, &e))?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::System {
            operation: program.to_string(),
            code: status.code(),
            message: format!("'{}' exited with {}", program, status),
        })
    }
}
