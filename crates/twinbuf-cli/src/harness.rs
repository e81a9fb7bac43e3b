//! Trial loop: runs every selected method over the buffer size sweep

use crate::report::{self, BenchmarkReport};
use std::cell::Cell;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use twinbuf_config::Config;
use twinbuf_io::{
    advise_sequential, aio, check_direct, copy_sendfile, copy_splice, count_reference,
    expect_count, file_len, mapped, open_read, open_write, plain, preallocate, purge_cache, tally,
    AsyncCopy, AsyncRead, AsyncWrite, OpenHints, PipelineOptions,
};
use twinbuf_types::{
    BufferSize, Engine, Error, Hints, Method, Result, TransferKind, TransferStats, TrialSummary,
};

/// Runs timed trials according to a loaded configuration
pub struct Harness<'a> {
    config: &'a Config,
    purge: Cell<bool>,
}

impl<'a> Harness<'a> {
    /// Create a harness for `config`
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            purge: Cell::new(config.benchmark.purge_cache),
        }
    }

    /// Catalog methods of `kind`, restricted to the configured names if any
    pub fn methods(&self, kind: TransferKind) -> Vec<Method> {
        let wanted = &self.config.benchmark.methods;
        Method::catalog(kind)
            .into_iter()
            .filter(|method| wanted.is_empty() || wanted.contains(&method.name()))
            .collect()
    }

    /// Configured buffer sizes no larger than `len`
    pub fn sizes_for(&self, len: u64) -> Result<Vec<BufferSize>> {
        let sizes = self.config.benchmark.buffer_sizes()?;
        let (kept, skipped): (Vec<_>, Vec<_>) =
            sizes.into_iter().partition(|size| size.get() as u64 <= len);
        if !skipped.is_empty() {
            debug!("Skipping {} buffer sizes larger than {} bytes", skipped.len(), len);
        }
        Ok(kept)
    }

    /// Time every read method on `path`, verifying each needle count
    pub fn read(&self, path: &Path) -> Result<BenchmarkReport> {
        let needle = self.config.benchmark.needle;
        let len = std::fs::metadata(path)
            .map_err(|e| Error::system(format!("stat '{}'", path.display()), &e))?
            .len();
        let expected = count_reference(path, needle)?;
        info!(
            "Reading '{}' ({} bytes, {} needles)",
            path.display(),
            len,
            expected
        );

        let methods = self.methods(TransferKind::Read);
        let results = self.sweep(methods, len, |method, options| {
            let hints = open_hints(method.hints, options)?;
            let file = open_read(path, OpenHints { no_atime: true, ..hints })?;
            if method.hints.fadvise {
                advise_sequential(&file, len)?;
            }

            let mut count = 0u64;
            let sink = |chunk: &[u8]| -> Result<()> {
                count += tally(chunk, needle);
                Ok(())
            };
            match (method.engine, options) {
                (Engine::Plain, Some(options)) => plain::read(&file, options, sink)?,
                (Engine::Async, Some(options)) => AsyncRead::new(options).run(&file, sink)?,
                (Engine::Mmap, _) => mapped::read(&file, sink)?,
                (Engine::Aio, Some(options)) => aio::read(&file, options, sink)?,
                _ => return Err(Error::unsupported(method.name())),
            };
            expect_count(expected, count)
        })?;

        Ok(self.report(TransferKind::Read, path.display().to_string(), results))
    }

    /// Time every write method producing `total` bytes at the configured target
    pub fn write(&self, total: u64) -> Result<BenchmarkReport> {
        let path = &self.config.paths.write_target;
        let needle = self.config.benchmark.needle;
        info!("Writing {} bytes to '{}'", total, path.display());

        // O_DIRECT refuses the unaligned tail of a buffered write
        let alignment = self.config.engine.alignment.get() as u64;
        let methods = self
            .methods(TransferKind::Write)
            .into_iter()
            .filter(|method| {
                let unaligned =
                    method.hints.direct && method.engine.uses_buffer() && total % alignment != 0;
                if unaligned {
                    warn!(
                        "Skipping {}: direct writes need a multiple of {} bytes, got {}",
                        method, alignment, total
                    );
                }
                !unaligned
            })
            .collect();

        let results = self.sweep(methods, total, |method, options| {
            let file = open_write(path, open_hints(method.hints, options)?)?;
            if method.hints.preallocate {
                preallocate(&file, total)?;
            }

            let fill = |buf: &mut [u8]| -> Result<()> {
                buf.fill(needle);
                Ok(())
            };
            let stats = match (method.engine, options) {
                (Engine::Plain, Some(options)) => plain::write(&file, options, total, fill)?,
                (Engine::Async, Some(options)) => AsyncWrite::new(options).run(&file, total, fill)?,
                (Engine::Mmap, _) => mapped::write(&file, total, fill)?,
                _ => return Err(Error::unsupported(method.name())),
            };
            expect_written(&file, total, &stats)
        })?;

        Ok(self.report(TransferKind::Write, total.to_string(), results))
    }

    /// Time every copy method from `src` to `dst`
    pub fn copy(&self, src: &Path, dst: &Path) -> Result<BenchmarkReport> {
        let len = std::fs::metadata(src)
            .map_err(|e| Error::system(format!("stat '{}'", src.display()), &e))?
            .len();
        info!(
            "Copying '{}' to '{}' ({} bytes)",
            src.display(),
            dst.display(),
            len
        );

        let methods = self.methods(TransferKind::Copy);
        let results = self.sweep(methods, len, |method, options| {
            // Direct I/O applies to the source only
            let source = open_read(src, open_hints(method.hints, options)?)?;
            let target = open_write(dst, OpenHints::cached())?;
            if method.hints.fadvise {
                advise_sequential(&source, len)?;
            }
            if method.hints.preallocate {
                preallocate(&target, len)?;
            }

            let stats = match (method.engine, options) {
                (Engine::Plain, Some(options)) => plain::copy(&source, &target, options)?,
                (Engine::Async, Some(options)) => AsyncCopy::new(options).run(&source, &target)?,
                (Engine::Mmap, _) => mapped::copy(&source, &target)?,
                (Engine::Sendfile, _) => copy_sendfile(&source, &target)?,
                (Engine::Splice, Some(options)) => {
                    copy_splice(&source, &target, options.capacity)?
                }
                _ => return Err(Error::unsupported(method.name())),
            };
            expect_written(&target, len, &stats)
        })?;

        Ok(self.report(
            TransferKind::Copy,
            format!("{} -> {}", src.display(), dst.display()),
            results,
        ))
    }

    fn report(&self, kind: TransferKind, target: String, results: Vec<TrialSummary>) -> BenchmarkReport {
        BenchmarkReport::new(kind, target, self.config.benchmark.trials.get(), results)
    }

    fn options(&self, size: BufferSize) -> PipelineOptions {
        PipelineOptions::new(size)
            .with_alignment(self.config.engine.alignment)
            .with_wait_strategy(self.config.engine.wait_strategy)
    }

    /// Measure every method, buffered engines once per size
    fn sweep<T>(&self, methods: Vec<Method>, len: u64, mut trial: T) -> Result<Vec<TrialSummary>>
    where
        T: FnMut(&Method, Option<PipelineOptions>) -> Result<()>,
    {
        let sizes = self.sizes_for(len)?;
        let mut results = Vec::new();

        for method in methods {
            if method.engine.uses_buffer() {
                for &size in &sizes {
                    let options = self.options(size);
                    if let Some(summary) =
                        self.measure(&method, Some(size), || trial(&method, Some(options)))?
                    {
                        results.push(summary);
                    }
                }
            } else if let Some(summary) = self.measure(&method, None, || trial(&method, None))? {
                results.push(summary);
            }
        }

        Ok(results)
    }

    /// Run the configured number of trials; `None` when the method was skipped
    fn measure<F>(
        &self,
        method: &Method,
        size: Option<BufferSize>,
        mut run: F,
    ) -> Result<Option<TrialSummary>>
    where
        F: FnMut() -> Result<()>,
    {
        let label = report::label(method, size);
        let trials = self.config.benchmark.trials.get();
        let mut samples = Vec::with_capacity(trials as usize);

        for trial in 0..trials {
            self.purge_cache();
            let start = Instant::now();
            match run() {
                Ok(()) => samples.push(start.elapsed().as_secs_f64() * 1000.0),
                Err(e) if e.is_fatal() => {
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping {} after trial {}: {}", label, trial, e);
                    return Ok(None);
                }
            }
        }

        let summary = TrialSummary::from_samples(label, method, size.map(BufferSize::get), samples);
        info!(
            "{}: mean {:.3} ms, stddev {:.3} ms",
            summary.label, summary.mean_ms, summary.stddev_ms
        );
        Ok(Some(summary))
    }

    fn purge_cache(&self) {
        if !self.purge.get() {
            return;
        }
        if let Err(e) = purge_cache() {
            warn!("Cannot purge the page cache, timing warm runs from now on: {}", e);
            self.purge.set(false);
        }
    }
}

/// Open hints for a method, rejecting direct I/O with an unaligned capacity
fn open_hints(hints: Hints, options: Option<PipelineOptions>) -> Result<OpenHints> {
    if !hints.direct {
        return Ok(OpenHints::cached());
    }
    if let Some(options) = options {
        check_direct(options.capacity, options.alignment)?;
    }
    Ok(OpenHints::direct())
}

/// Check a finished write or copy against the expected length
fn expect_written(file: &File, expected: u64, stats: &TransferStats) -> Result<()> {
    let len = file_len(file)?;
    if stats.bytes == expected && len == expected {
        return Ok(());
    }
    // Everything before the first missing byte counts as written
    let written = stats.bytes.min(len).min(expected);
    Err(Error::ShortWrite {
        expected: usize::try_from(expected - written).unwrap_or(usize::MAX),
        written: 0,
        offset: written,
    })
}
