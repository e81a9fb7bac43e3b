//! Double-buffered read through POSIX AIO
//!
//! One thread, two slots: while the sink looks at one slot the kernel fills
//! the other through a single outstanding `aio_read` request. The first chunk
//! is read synchronously so a short file never submits a request.

use crate::pipeline::PipelineOptions;
use std::fs::File;
use twinbuf_types::{Result, TransferStats};

/// Read `file` to EOF, passing each chunk to `sink` while the next is in flight
#[cfg(target_os = "linux")]
pub fn read<S>(file: &File, options: PipelineOptions, mut sink: S) -> Result<TransferStats>
where
    S: FnMut(&[u8]) -> Result<()>,
{
    use crate::blocking::read_exact;
    use crate::buffer::AlignedBuffer;
    use std::time::Instant;
    use tracing::debug;

    let start = Instant::now();
    let mut front = AlignedBuffer::new(options.capacity, options.alignment)?;
    let mut back = AlignedBuffer::new(options.capacity, options.alignment)?;
    let capacity = front.len();
    let mut stats = TransferStats::new();

    let mut filled = read_exact(file, front.as_mut_slice(), 0)?;
    let (mut current, mut next) = (&mut front, &mut back);

    while filled == capacity {
        let offset = stats.bytes + capacity as u64;
        let request = Request::submit(file, next.as_mut_slice(), offset)?;
        stats.worker_spawned = true;

        sink(current.as_slice())?;
        stats.bytes += capacity as u64;
        stats.chunks += 1;

        filled = request.wait()?;
        if filled > 0 && filled < capacity {
            // Rare short completion before EOF: finish the slot synchronously
            filled += read_exact(file, &mut next.as_mut_slice()[filled..], offset + filled as u64)?;
        }
        std::mem::swap(&mut current, &mut next);
    }

    sink(&current.as_slice()[..filled])?;
    stats.bytes += filled as u64;
    stats.chunks += 1;

    stats.duration = start.elapsed();
    debug!("AIO read: {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

/// Read `file` to EOF, passing each chunk to `sink` while the next is in flight
#[cfg(not(target_os = "linux"))]
pub fn read<S>(_file: &File, _options: PipelineOptions, _sink: S) -> Result<TransferStats>
where
    S: FnMut(&[u8]) -> Result<()>,
{
    Err(twinbuf_types::Error::unsupported("POSIX AIO read"))
}

/// One outstanding `aio_read` into a borrowed slot.
///
/// Dropping a request that has not completed cancels it and waits, so the
/// kernel never writes into a slot that is gone.
#[cfg(target_os = "linux")]
struct Request<'buf> {
    cb: Box<libc::aiocb>,
    pending: bool,
    _slot: std::marker::PhantomData<&'buf mut [u8]>,
}

#[cfg(target_os = "linux")]
impl<'buf> Request<'buf> {
    fn submit(file: &File, slot: &'buf mut [u8], offset: u64) -> Result<Self> {
        use std::os::unix::io::AsRawFd;
        use twinbuf_types::Error;

        // SAFETY: aiocb is a plain C struct; all zeroes is an empty request
        let mut cb: Box<libc::aiocb> = Box::new(unsafe { std::mem::zeroed() });
        cb.aio_fildes = file.as_raw_fd();
        cb.aio_buf = slot.as_mut_ptr().cast();
        cb.aio_nbytes = slot.len();
        cb.aio_offset = libc::off_t::try_from(offset)
            .map_err(|_| Error::config(format!("Offset {} out of range for aio_read", offset)))?;

        // SAFETY: the control block is boxed and the slot is borrowed for
        // 'buf, so both outlive the request; Drop waits for completion.
        if unsafe { libc::aio_read(&mut *cb) } == -1 {
            let error = std::io::Error::last_os_error();
            return Err(match error.raw_os_error() {
                Some(libc::ENOSYS) => Error::unsupported("aio_read"),
                _ => Error::system("aio_read", &error),
            });
        }

        Ok(Self {
            cb,
            pending: true,
            _slot: std::marker::PhantomData,
        })
    }

    /// Block until the request completes and return the byte count
    fn wait(mut self) -> Result<usize> {
        use std::io;
        use twinbuf_types::Error;

        let status = self.suspend()?;
        self.pending = false;
        // SAFETY: the request has completed, so aio_return may reap it once
        let rc = unsafe { libc::aio_return(&mut *self.cb) };
        if status != 0 {
            return Err(Error::system("aio_read", &io::Error::from_raw_os_error(status)));
        }
        #[allow(clippy::cast_sign_loss)]
        Ok(rc as usize)
    }

    /// Sleep in `aio_suspend` until the request leaves EINPROGRESS
    fn suspend(&self) -> Result<libc::c_int> {
        use std::{io, ptr};
        use twinbuf_types::Error;

        let list = [&*self.cb as *const libc::aiocb];
        loop {
            // SAFETY: the control block stays valid while `self` lives
            let status = unsafe { libc::aio_error(&*self.cb) };
            if status != libc::EINPROGRESS {
                return Ok(status);
            }
            // SAFETY: `list` holds one valid pointer; a null timeout blocks
            if unsafe { libc::aio_suspend(list.as_ptr(), 1, ptr::null()) } == -1 {
                let error = io::Error::last_os_error();
                if error.kind() != io::ErrorKind::Interrupted {
                    return Err(Error::system("aio_suspend", &error));
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for Request<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        // SAFETY: the descriptor and control block are still valid
        unsafe { libc::aio_cancel(self.cb.aio_fildes, &mut *self.cb) };
        // SAFETY: aio_error only reads the control block
        while unsafe { libc::aio_error(&*self.cb) } == libc::EINPROGRESS {
            std::thread::yield_now();
        }
        // SAFETY: the request is no longer in progress
        unsafe { libc::aio_return(&mut *self.cb) };
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::pipeline::tally;
    use rstest::rstest;
    use tempfile::tempdir;
    use twinbuf_types::{BufferSize, Error, NEEDLE};

    fn source(len: usize) -> (tempfile::TempDir, File, Vec<u8>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aio.bin");
        let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let file = File::open(&path).unwrap();
        (dir, file, data)
    }

    #[rstest]
    #[case(0, 1)]
    #[case(4095, 1)]
    #[case(4096, 2)]
    #[case(10 * 4096, 11)]
    #[case(10 * 4096 + 17, 11)]
    fn test_read_chunks(#[case] len: usize, #[case] chunks: u64) {
        let (_dir, file, data) = source(len);
        let options = PipelineOptions::new(BufferSize::new(4096).unwrap());

        let mut seen = Vec::new();
        let stats = read(&file, options, |chunk| {
            seen.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, data);
        assert_eq!(stats.bytes, len as u64);
        assert_eq!(stats.chunks, chunks);
        assert_eq!(stats.worker_spawned, len >= 4096);
    }

    #[test]
    fn test_read_counts_needles() {
        let (_dir, file, data) = source(300_001);
        let options = PipelineOptions::new(BufferSize::from_kib(64).unwrap());

        let mut count = 0;
        read(&file, options, |chunk| {
            count += tally(chunk, NEEDLE);
            Ok(())
        })
        .unwrap();
        assert_eq!(count, data.iter().filter(|&&b| b == NEEDLE).count() as u64);
    }

    #[test]
    fn test_sink_error_waits_for_request() {
        let (_dir, file, _) = source(64 * 1024);
        let options = PipelineOptions::new(BufferSize::new(4096).unwrap());

        let mut calls = 0;
        let error = read(&file, options, |_| {
            calls += 1;
            if calls == 3 {
                Err(Error::config("stop"))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert_eq!(error.kind(), twinbuf_types::ErrorKind::Config);
        assert_eq!(calls, 3);
    }
}
