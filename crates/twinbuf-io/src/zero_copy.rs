//! Kernel-side copy baselines: `sendfile` and `splice` through a pipe

use std::fs::File;
use twinbuf_types::{BufferSize, Result, TransferStats};

/// Largest count a single `sendfile` call accepts on Linux
#[cfg(any(target_os = "linux", target_os = "android"))]
const SENDFILE_MAX: usize = 0x7fff_f000;

/// Copy all of `src` into `dst` with `sendfile`, never touching user memory
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn copy_sendfile(src: &File, dst: &File) -> Result<TransferStats> {
    use std::io;
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;
    use tracing::debug;
    use twinbuf_types::Error;

    let start = Instant::now();
    let total = src.metadata().map_err(|e| Error::system("fstat", &e))?.len();
    let mut offset: libc::off_t = 0;
    let mut stats = TransferStats::new();

    while stats.bytes < total {
        #[allow(clippy::cast_possible_truncation)]
        let count = (total - stats.bytes).min(SENDFILE_MAX as u64) as usize;
        // SAFETY: both descriptors are valid for the duration of the call and
        // `offset` is a live local.
        let rc = unsafe { libc::sendfile(dst.as_raw_fd(), src.as_raw_fd(), &mut offset, count) };
        match rc {
            -1 => {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::system("sendfile", &error));
            }
            0 => break,
            #[allow(clippy::cast_sign_loss)]
            n => {
                stats.bytes += n as u64;
                stats.chunks += 1;
            }
        }
    }

    stats.duration = start.elapsed();
    debug!("Sendfile copy: {} bytes in {} calls", stats.bytes, stats.chunks);
    Ok(stats)
}

/// Copy all of `src` into `dst` with `sendfile`, never touching user memory
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn copy_sendfile(_src: &File, _dst: &File) -> Result<TransferStats> {
    Err(twinbuf_types::Error::unsupported("sendfile"))
}

/// Copy all of `src` into `dst` by splicing through a pipe, at most
/// `chunk` bytes per round trip
///
/// The pipe is grown towards `chunk` when the kernel allows it; a smaller pipe
/// only means more, shorter splices.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn copy_splice(src: &File, dst: &File, chunk: BufferSize) -> Result<TransferStats> {
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::Instant;
    use tracing::debug;
    use twinbuf_types::Error;

    let start = Instant::now();
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: `fds` has room for the two descriptors pipe2 writes
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(Error::system("pipe2", &std::io::Error::last_os_error()));
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by us
    let (pipe_r, pipe_w) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let wanted = chunk.get().min(libc::c_int::MAX as usize) as libc::c_int;
    // SAFETY: plain fcntl on an owned pipe; failure leaves the default size
    unsafe { libc::fcntl(pipe_w.as_raw_fd(), libc::F_SETPIPE_SZ, wanted) };

    let mut off_in: libc::loff_t = 0;
    let mut off_out: libc::loff_t = 0;
    let mut stats = TransferStats::new();

    loop {
        let filled = splice_once(
            src.as_raw_fd(),
            Some(&mut off_in),
            pipe_w.as_raw_fd(),
            None,
            chunk.get(),
        )?;
        if filled == 0 {
            break;
        }
        let mut pending = filled;
        while pending > 0 {
            let n = splice_once(
                pipe_r.as_raw_fd(),
                None,
                dst.as_raw_fd(),
                Some(&mut off_out),
                pending,
            )?;
            if n == 0 {
                return Err(Error::ShortWrite {
                    expected: filled,
                    written: filled - pending,
                    offset: stats.bytes,
                });
            }
            pending -= n;
        }
        stats.bytes += filled as u64;
        stats.chunks += 1;
    }

    stats.duration = start.elapsed();
    debug!("Splice copy: {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

/// One `splice` call, retried while interrupted
#[cfg(any(target_os = "linux", target_os = "android"))]
fn splice_once(
    fd_in: libc::c_int,
    off_in: Option<&mut libc::loff_t>,
    fd_out: libc::c_int,
    off_out: Option<&mut libc::loff_t>,
    len: usize,
) -> Result<usize> {
    use std::io;
    use std::ptr;
    use twinbuf_types::Error;

    let off_in = off_in.map_or(ptr::null_mut(), |off| off as *mut libc::loff_t);
    let off_out = off_out.map_or(ptr::null_mut(), |off| off as *mut libc::loff_t);
    loop {
        // SAFETY: descriptors are open for the call and the offsets are
        // either null or point at live locals of the caller.
        let rc = unsafe { libc::splice(fd_in, off_in, fd_out, off_out, len, libc::SPLICE_F_MOVE) };
        if rc >= 0 {
            #[allow(clippy::cast_sign_loss)]
            return Ok(rc as usize);
        }
        let error = io::Error::last_os_error();
        match error.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EINVAL | libc::ENOSYS) => return Err(Error::unsupported("splice")),
            _ => return Err(Error::system("splice", &error)),
        }
    }
}

/// Copy all of `src` into `dst` by splicing through a pipe
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn copy_splice(_src: &File, _dst: &File, _chunk: BufferSize) -> Result<TransferStats> {
    Err(twinbuf_types::Error::unsupported("splice"))
}
