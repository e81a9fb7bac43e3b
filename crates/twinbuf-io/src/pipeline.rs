//! Double-buffered transfer pipelines
//!
//! Each pipeline runs exactly two threads: the caller and one scoped worker.
//! The first chunk is produced on the caller's thread before the worker
//! exists; when that chunk already ends the stream the whole transfer
//! finishes synchronously and no worker is started.
//!
//! | pipeline     | producer            | consumer              |
//! |--------------|---------------------|-----------------------|
//! | [`AsyncRead`]  | worker, reads file  | caller, runs the sink |
//! | [`AsyncWrite`] | caller, runs fill   | worker, writes file   |
//! | [`AsyncCopy`]  | caller, reads src   | worker, writes dst    |

use crate::blocking::{read_exact, write_exact, PositionalFile};
use crate::handshake::{Consumer, DoubleBuffer, Flow, Producer};
use std::any::Any;
use std::thread;
use std::time::Instant;
use tracing::debug;
use twinbuf_types::{Alignment, BufferSize, Error, Result, TransferStats, WaitStrategy, NEEDLE};

/// Buffer geometry and wait behaviour shared by all pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineOptions {
    /// Capacity of each of the two slots
    pub capacity: BufferSize,
    /// Alignment of each slot's start address
    pub alignment: Alignment,
    /// How a blocked side waits for its partner
    pub wait: WaitStrategy,
}

impl PipelineOptions {
    /// Options with the given capacity and default alignment and waiting
    pub fn new(capacity: BufferSize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Set the slot alignment
    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    fn buffers(&self) -> Result<DoubleBuffer> {
        Ok(DoubleBuffer::new(self.capacity, self.alignment)?.with_wait_strategy(self.wait))
    }
}

/// Sequential read: a worker reads ahead while the caller consumes chunks
#[derive(Debug, Clone, Copy)]
pub struct AsyncRead {
    options: PipelineOptions,
}

impl AsyncRead {
    /// Create a read pipeline
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Read `file` from offset 0 to EOF, passing every chunk to `sink` in order
    pub fn run<F, S>(&self, file: &F, mut sink: S) -> Result<TransferStats>
    where
        F: PositionalFile + Sync + ?Sized,
        S: FnMut(&[u8]) -> Result<()>,
    {
        let start = Instant::now();
        let buffers = self.options.buffers()?;
        let capacity = buffers.capacity() as u64;
        let (mut producer, mut consumer) = buffers.split();

        let seed = producer.fill(|buf| read_exact(file, buf, 0))?;
        let worker_spawned = seed == Flow::Continue;
        if worker_spawned {
            thread::scope(|scope| {
                let worker = scope.spawn(|| produce_reads(&mut producer, file, capacity, capacity));
                let drained = drain_all(&mut consumer, &mut sink);
                settle(drained, join(worker))
            })?;
        } else {
            drain_all(&mut consumer, &mut sink)?;
        }

        let stats = finish_stats(&consumer, worker_spawned, start);
        debug!(
            "Async read: {} bytes in {} chunks, worker spawned: {}",
            stats.bytes, stats.chunks, stats.worker_spawned
        );
        Ok(stats)
    }
}

/// Count occurrences of `needle` in `file` with the async read pipeline
pub fn count_needles<F>(file: &F, options: PipelineOptions, needle: u8) -> Result<u64>
where
    F: PositionalFile + Sync + ?Sized,
{
    let mut count = 0u64;
    AsyncRead::new(options).run(file, |chunk| {
        count += tally(chunk, needle);
        Ok(())
    })?;
    Ok(count)
}

/// Count [`NEEDLE`] bytes with the async read pipeline
pub fn count_default_needles<F>(file: &F, options: PipelineOptions) -> Result<u64>
where
    F: PositionalFile + Sync + ?Sized,
{
    count_needles(file, options, NEEDLE)
}

/// Occurrences of `needle` in `chunk`
pub fn tally(chunk: &[u8], needle: u8) -> u64 {
    chunk.iter().filter(|&&b| b == needle).count() as u64
}

/// Sequential write: the caller generates chunks while a worker writes them
#[derive(Debug, Clone, Copy)]
pub struct AsyncWrite {
    options: PipelineOptions,
}

impl AsyncWrite {
    /// Create a write pipeline
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Write exactly `total` bytes to `file` from offset 0.
    ///
    /// `fill` is called once per chunk with the slice to populate; every call
    /// but the last gets a full slot. A `total` that fits one slot is written
    /// synchronously.
    pub fn run<F, G>(&self, file: &F, total: u64, mut fill: G) -> Result<TransferStats>
    where
        F: PositionalFile + Sync + ?Sized,
        G: FnMut(&mut [u8]) -> Result<()>,
    {
        let start = Instant::now();
        let buffers = self.options.buffers()?;
        let capacity = buffers.capacity() as u64;
        let (mut producer, mut consumer) = buffers.split();

        let worker_spawned = total > capacity;
        if worker_spawned {
            produce_chunk(&mut producer, capacity as usize, &mut fill)?;
            thread::scope(|scope| {
                let worker = scope.spawn(|| write_all(&mut consumer, file));
                let produced =
                    produce_generated(&mut producer, total - capacity, capacity, &mut fill);
                settle(produced, join(worker))
            })?;
        } else {
            produce_generated(&mut producer, total, capacity, &mut fill)?;
            write_all(&mut consumer, file)?;
        }

        let stats = finish_stats(&consumer, worker_spawned, start);
        debug!(
            "Async write: {} bytes in {} chunks, worker spawned: {}",
            stats.bytes, stats.chunks, stats.worker_spawned
        );
        Ok(stats)
    }
}

/// Sequential copy: the caller reads the source while a worker writes the
/// destination at the same offsets
#[derive(Debug, Clone, Copy)]
pub struct AsyncCopy {
    options: PipelineOptions,
}

impl AsyncCopy {
    /// Create a copy pipeline
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Copy `src` from offset 0 to EOF into `dst`
    pub fn run<S, D>(&self, src: &S, dst: &D) -> Result<TransferStats>
    where
        S: PositionalFile + ?Sized,
        D: PositionalFile + Sync + ?Sized,
    {
        let start = Instant::now();
        let buffers = self.options.buffers()?;
        let capacity = buffers.capacity() as u64;
        let (mut producer, mut consumer) = buffers.split();

        let seed = producer.fill(|buf| read_exact(src, buf, 0))?;
        let worker_spawned = seed == Flow::Continue;
        if worker_spawned {
            thread::scope(|scope| {
                let worker = scope.spawn(|| write_all(&mut consumer, dst));
                let produced = produce_reads(&mut producer, src, capacity, capacity);
                settle(produced, join(worker))
            })?;
        } else {
            write_all(&mut consumer, dst)?;
        }

        let stats = finish_stats(&consumer, worker_spawned, start);
        debug!(
            "Async copy: {} bytes in {} chunks, worker spawned: {}",
            stats.bytes, stats.chunks, stats.worker_spawned
        );
        Ok(stats)
    }
}

fn produce_reads<F>(
    producer: &mut Producer<'_>,
    file: &F,
    mut offset: u64,
    capacity: u64,
) -> Result<()>
where
    F: PositionalFile + ?Sized,
{
    loop {
        match producer.fill(|buf| read_exact(file, buf, offset))? {
            Flow::Continue => offset += capacity,
            Flow::Finished => return Ok(()),
            Flow::PartnerFailed => return Err(Error::PartnerAborted),
        }
    }
}

fn produce_chunk<G>(producer: &mut Producer<'_>, len: usize, fill: &mut G) -> Result<Flow>
where
    G: FnMut(&mut [u8]) -> Result<()>,
{
    producer.fill(|buf| {
        fill(&mut buf[..len])?;
        Ok(len)
    })
}

fn produce_generated<G>(
    producer: &mut Producer<'_>,
    mut remaining: u64,
    capacity: u64,
    fill: &mut G,
) -> Result<()>
where
    G: FnMut(&mut [u8]) -> Result<()>,
{
    while remaining > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let len = remaining.min(capacity) as usize;
        if produce_chunk(producer, len, fill)? == Flow::PartnerFailed {
            return Err(Error::PartnerAborted);
        }
        remaining -= len as u64;
    }
    match producer.finish() {
        Flow::PartnerFailed => Err(Error::PartnerAborted),
        _ => Ok(()),
    }
}

fn drain_all<S>(consumer: &mut Consumer<'_>, sink: &mut S) -> Result<()>
where
    S: FnMut(&[u8]) -> Result<()>,
{
    loop {
        match consumer.drain(|chunk| sink(chunk))? {
            Flow::Continue => {}
            Flow::Finished => return Ok(()),
            Flow::PartnerFailed => return Err(Error::PartnerAborted),
        }
    }
}

fn write_all<F>(consumer: &mut Consumer<'_>, file: &F) -> Result<()>
where
    F: PositionalFile + ?Sized,
{
    loop {
        let offset = consumer.bytes();
        let flow = consumer.drain(|chunk| write_exact(file, chunk, offset).map(|_| ()))?;
        match flow {
            Flow::Continue => {}
            Flow::Finished => return Ok(()),
            Flow::PartnerFailed => return Err(Error::PartnerAborted),
        }
    }
}

fn join(worker: thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    worker.join().unwrap_or_else(|payload| {
        Err(Error::WorkerPanicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Combine the caller's and the worker's outcome into the session result
fn settle(caller: Result<()>, worker: Result<()>) -> Result<()> {
    match (caller, worker) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(first), Err(second)) => Err(Error::merge(first, second)),
    }
}

fn finish_stats(consumer: &Consumer<'_>, worker_spawned: bool, start: Instant) -> TransferStats {
    TransferStats {
        bytes: consumer.bytes(),
        chunks: consumer.chunks(),
        worker_spawned,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::{open_read, open_write};
    use crate::hints::OpenHints;
    use rstest::rstest;
    use std::fs::File;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use twinbuf_types::ErrorKind;

    fn options(capacity: usize) -> PipelineOptions {
        PipelineOptions::new(BufferSize::new(capacity).unwrap())
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    fn file_with(dir: &TempDir, name: &str, data: &[u8]) -> File {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        open_read(&path, OpenHints::cached()).unwrap()
    }

    /// Wraps a file and fails the `fail_at`-th write call (1-based)
    struct FailingWrites {
        inner: File,
        fail_at: usize,
        calls: AtomicUsize,
    }

    impl PositionalFile for FailingWrites {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            self.inner.read_at(buf, offset)
        }

        fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
                return Err(io::Error::from_raw_os_error(28));
            }
            self.inner.write_at(buf, offset)
        }

        fn len(&self) -> io::Result<u64> {
            PositionalFile::len(&self.inner)
        }
    }

    /// Fails every read at or beyond `fail_from`
    struct FailingReads {
        data: Vec<u8>,
        fail_from: u64,
    }

    impl PositionalFile for FailingReads {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            if offset >= self.fail_from {
                return Err(io::Error::from_raw_os_error(5));
            }
            let start = offset as usize;
            let n = buf.len().min(self.data.len().saturating_sub(start));
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn write_at(&self, _buf: &[u8], _offset: u64) -> io::Result<usize> {
            Err(io::ErrorKind::Unsupported.into())
        }

        fn len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }
    }

    #[rstest]
    #[case(0, 16)]
    #[case(1, 16)]
    #[case(15, 16)]
    #[case(16, 16)]
    #[case(17, 16)]
    #[case(160, 16)]
    #[case(1000, 7)]
    #[case(100_000, 4096)]
    fn test_async_read_matches_serial_count(#[case] len: usize, #[case] capacity: usize) {
        let dir = tempdir().unwrap();
        let mut data = pattern(len);
        for i in (0..len).step_by(13) {
            data[i] = NEEDLE;
        }
        let file = file_with(&dir, "needles.bin", &data);

        let count = count_needles(&file, options(capacity), NEEDLE).unwrap();
        assert_eq!(count, tally(&data, NEEDLE));
    }

    #[test]
    fn test_empty_read_spawns_no_worker() {
        let dir = tempdir().unwrap();
        let file = file_with(&dir, "empty.bin", &[]);

        let mut calls = 0;
        let stats = AsyncRead::new(options(64))
            .run(&file, |chunk| {
                calls += 1;
                assert!(chunk.is_empty());
                Ok(())
            })
            .unwrap();

        assert_eq!(stats.bytes, 0);
        assert!(!stats.worker_spawned);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unaligned_length_ends_with_one_short_chunk() {
        let dir = tempdir().unwrap();
        let data = pattern(10 * 64 + 5);
        let file = file_with(&dir, "tail.bin", &data);

        let mut sizes = Vec::new();
        let mut received = Vec::new();
        let stats = AsyncRead::new(options(64))
            .run(&file, |chunk| {
                sizes.push(chunk.len());
                received.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();

        assert_eq!(received, data);
        assert_eq!(sizes.len(), 11);
        assert!(sizes[..10].iter().all(|&n| n == 64));
        assert_eq!(sizes[10], 5);
        assert_eq!(stats.chunks, 11);
        assert!(stats.worker_spawned);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(63)]
    #[case(64)]
    #[case(65)]
    #[case(640)]
    fn test_write_then_read_round_trip(#[case] len: usize) {
        let capacity = 64;
        let dir = tempdir().unwrap();
        let path = dir.path().join("round_trip.bin");
        let data = pattern(len);

        let file = open_write(&path, OpenHints::cached()).unwrap();
        let mut cursor = 0;
        let stats = AsyncWrite::new(options(capacity))
            .run(&file, len as u64, |buf| {
                buf.copy_from_slice(&data[cursor..cursor + buf.len()]);
                cursor += buf.len();
                Ok(())
            })
            .unwrap();
        drop(file);

        assert_eq!(stats.bytes, len as u64);
        assert_eq!(stats.worker_spawned, len > capacity);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len as u64);

        let file = open_read(&path, OpenHints::cached()).unwrap();
        let mut received = Vec::new();
        AsyncRead::new(options(capacity))
            .run(&file, |chunk| {
                received.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(received, data);
    }

    #[test]
    fn test_exact_capacity_write_is_synchronous() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exact.bin");
        let file = open_write(&path, OpenHints::cached()).unwrap();

        let mut calls = 0;
        let stats = AsyncWrite::new(options(4096))
            .run(&file, 4096, |buf| {
                calls += 1;
                buf.fill(0xAA);
                Ok(())
            })
            .unwrap();

        assert!(!stats.worker_spawned);
        assert_eq!(calls, 1);
        assert_eq!(stats.bytes, 4096);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xAA; 4096]);
    }

    #[test]
    fn test_multiple_of_capacity_write_has_no_trailing_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multiple.bin");
        let file = open_write(&path, OpenHints::cached()).unwrap();

        let mut lens = Vec::new();
        let stats = AsyncWrite::new(options(32))
            .run(&file, 96, |buf| {
                lens.push(buf.len());
                Ok(())
            })
            .unwrap();

        assert_eq!(lens, vec![32, 32, 32]);
        assert_eq!(stats.chunks, 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 96);
    }

    #[test]
    fn test_second_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enospc.bin");
        let file = FailingWrites {
            inner: open_write(&path, OpenHints::cached()).unwrap(),
            fail_at: 2,
            calls: AtomicUsize::new(0),
        };

        let error = AsyncWrite::new(options(16))
            .run(&file, 16 * 8, |buf| {
                buf.fill(1);
                Ok(())
            })
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::System);
        assert_eq!(error.raw_os_error(), Some(28));
    }

    #[test]
    fn test_copy_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let src = file_with(&dir, "src.bin", &pattern(1024));
        let dst = FailingWrites {
            inner: open_write(dir.path().join("dst.bin"), OpenHints::cached()).unwrap(),
            fail_at: 2,
            calls: AtomicUsize::new(0),
        };

        let error = AsyncCopy::new(options(64)).run(&src, &dst).unwrap_err();
        assert_eq!(error.raw_os_error(), Some(28));
    }

    #[test]
    fn test_read_failure_in_worker_is_reported() {
        let file = FailingReads {
            data: pattern(1000),
            fail_from: 300,
        };

        let mut received = 0;
        let error = AsyncRead::new(options(100))
            .run(&file, |chunk| {
                received += chunk.len();
                Ok(())
            })
            .unwrap_err();

        assert_eq!(error.raw_os_error(), Some(5));
        assert!(received <= 300);
    }

    #[test]
    fn test_sink_failure_stops_reader() {
        let dir = tempdir().unwrap();
        let file = file_with(&dir, "sink.bin", &pattern(64 * 20));

        let mut calls = 0;
        let error = AsyncRead::new(options(64))
            .run(&file, |_| {
                calls += 1;
                if calls == 3 {
                    Err(Error::CountMismatch {
                        expected: 0,
                        actual: 1,
                    })
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::CountMismatch);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_fill_failure_stops_writer() {
        let dir = tempdir().unwrap();
        let file = open_write(dir.path().join("fill.bin"), OpenHints::cached()).unwrap();

        let mut calls = 0;
        let error = AsyncWrite::new(options(8))
            .run(&file, 80, |_| {
                calls += 1;
                if calls == 4 {
                    Err(Error::config("generator exhausted"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_copy_ten_mebibytes() {
        let dir = tempdir().unwrap();
        let data = pattern(10 * 1024 * 1024);
        let src = file_with(&dir, "big_src.bin", &data);
        let dst_path = dir.path().join("big_dst.bin");
        let dst = open_write(&dst_path, OpenHints::cached()).unwrap();

        let stats = AsyncCopy::new(options(64 * 1024)).run(&src, &dst).unwrap();
        drop(dst);

        assert_eq!(stats.bytes, data.len() as u64);
        assert!(stats.worker_spawned);
        assert_eq!(std::fs::read(&dst_path).unwrap(), data);
    }

    #[test]
    fn test_small_copy_is_synchronous() {
        let dir = tempdir().unwrap();
        let src = file_with(&dir, "small.bin", b"tiny");
        let dst_path = dir.path().join("small_dst.bin");
        let dst = open_write(&dst_path, OpenHints::cached()).unwrap();

        let stats = AsyncCopy::new(options(4096)).run(&src, &dst).unwrap();
        assert!(!stats.worker_spawned);
        assert_eq!(std::fs::read(&dst_path).unwrap(), b"tiny");
    }

    #[test]
    fn test_yield_strategy_reads_the_same() {
        let dir = tempdir().unwrap();
        let data = pattern(50_000);
        let file = file_with(&dir, "yield.bin", &data);

        let spin = count_needles(&file, options(1000), 0).unwrap();
        let yielding = count_needles(
            &file,
            options(1000).with_wait_strategy(WaitStrategy::Yield),
            0,
        )
        .unwrap();
        assert_eq!(spin, yielding);
        assert_eq!(spin, tally(&data, 0));
    }

    #[test]
    fn test_settle_prefers_real_error() {
        let real = Error::ShortWrite {
            expected: 1,
            written: 0,
            offset: 0,
        };
        let settled = settle(Err(Error::PartnerAborted), Err(real)).unwrap_err();
        assert_eq!(settled.kind(), ErrorKind::ShortWrite);
        assert!(settle(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
