//! Core data types for twinbuf
//!
//! Transfer statistics, the catalog of benchmark methods, and trial summaries.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sentinel byte counted by read trials to verify correctness
pub const NEEDLE: u8 = 0xFF;

/// Statistics for one transfer session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransferStats {
    /// Total bytes moved through the session
    pub bytes: u64,
    /// Number of chunks handed from producer to consumer
    pub chunks: u64,
    /// Whether a worker thread was started
    pub worker_spawned: bool,
    /// Wall-clock duration of the session
    pub duration: Duration,
}

impl TransferStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Throughput in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.bytes as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransferKind {
    /// Sequential read of one file
    Read,
    /// Sequential write of generated data
    Write,
    /// Sequential copy from one file to another
    Copy,
}

impl TransferKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Copy => "copy",
        }
    }
}

/// Transfer engine used by a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Engine {
    /// One buffer, one thread
    Plain,
    /// Two buffers, two threads, spin handshake
    Async,
    /// Memory-mapped file
    Mmap,
    /// Kernel-side copy with `sendfile`
    Sendfile,
    /// Kernel-side copy through a pipe with `splice`
    Splice,
    /// Two buffers, one in-flight POSIX AIO request
    Aio,
}

impl Engine {
    /// Whether the engine is parameterised by a buffer size
    pub fn uses_buffer(self) -> bool {
        matches!(self, Self::Plain | Self::Async | Self::Splice | Self::Aio)
    }
}

/// OS hints applied around a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hints {
    /// Bypass the page cache
    pub direct: bool,
    /// Reserve the destination size before writing
    pub preallocate: bool,
    /// Advise the kernel of sequential access
    pub fadvise: bool,
}

impl Hints {
    /// No hints
    pub const NONE: Self = Self {
        direct: false,
        preallocate: false,
        fadvise: false,
    };
    /// Direct I/O only
    pub const DIRECT: Self = Self {
        direct: true,
        ..Self::NONE
    };
    /// Preallocation only
    pub const PREALLOCATE: Self = Self {
        preallocate: true,
        ..Self::NONE
    };
    /// Sequential advice only
    pub const FADVISE: Self = Self {
        fadvise: true,
        ..Self::NONE
    };

    /// Whether no hint is set
    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }

    fn suffix(self) -> String {
        let mut parts = Vec::new();
        if self.direct {
            parts.push("direct");
        }
        if self.preallocate {
            parts.push("preallocate");
        }
        if self.fadvise {
            parts.push("fadvise");
        }
        if parts.is_empty() {
            "plain".to_string()
        } else {
            parts.join("_")
        }
    }
}

/// A named combination of transfer kind, engine and hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Method {
    /// Direction of the transfer
    pub kind: TransferKind,
    /// Engine doing the transfer
    pub engine: Engine,
    /// OS hints applied around it
    pub hints: Hints,
}

impl Method {
    /// Create a new method
    pub const fn new(kind: TransferKind, engine: Engine, hints: Hints) -> Self {
        Self {
            kind,
            engine,
            hints,
        }
    }

    /// Canonical method name, e.g. `read_async_direct` or `copy_sendfile_plain`
    pub fn name(&self) -> String {
        let prefix = self.kind.prefix();
        let suffix = self.hints.suffix();
        match self.engine {
            Engine::Plain => format!("{}_{}", prefix, suffix),
            Engine::Async => format!("{}_async_{}", prefix, suffix),
            Engine::Mmap => format!("{}_mmap_{}", prefix, suffix),
            Engine::Sendfile => format!("{}_sendfile_{}", prefix, suffix),
            Engine::Splice => format!("{}_splice_{}", prefix, suffix),
            Engine::Aio => format!("{}_aio_{}", prefix, suffix),
        }
    }

    /// Every method the harness knows for one transfer kind
    pub fn catalog(kind: TransferKind) -> Vec<Self> {
        const DIRECT_PREALLOCATE: Hints = Hints {
            direct: true,
            preallocate: true,
            fadvise: false,
        };
        const PREALLOCATE_FADVISE: Hints = Hints {
            direct: false,
            preallocate: true,
            fadvise: true,
        };
        const KERNEL_COPY: [Hints; 4] = [
            Hints::NONE,
            Hints::PREALLOCATE,
            Hints::FADVISE,
            PREALLOCATE_FADVISE,
        ];

        let mut methods = Vec::new();
        let mut add = |engine: Engine, hints: &[Hints]| {
            methods.extend(hints.iter().map(|&hints| Self::new(kind, engine, hints)));
        };

        let buffered: &[Hints] = match kind {
            TransferKind::Read => &[Hints::NONE, Hints::DIRECT, Hints::FADVISE],
            TransferKind::Write => &[
                Hints::NONE,
                Hints::DIRECT,
                Hints::PREALLOCATE,
                DIRECT_PREALLOCATE,
            ],
            TransferKind::Copy => &[Hints::NONE, Hints::DIRECT, Hints::PREALLOCATE],
        };
        add(Engine::Plain, buffered);
        add(Engine::Async, buffered);

        match kind {
            TransferKind::Read => {
                add(Engine::Mmap, &[Hints::NONE, Hints::FADVISE]);
                add(Engine::Aio, &[Hints::DIRECT, Hints::FADVISE]);
            }
            TransferKind::Write => add(Engine::Mmap, &[Hints::PREALLOCATE, DIRECT_PREALLOCATE]),
            TransferKind::Copy => {
                add(Engine::Mmap, &[Hints::NONE, Hints::FADVISE]);
                add(Engine::Sendfile, &KERNEL_COPY);
                add(Engine::Splice, &KERNEL_COPY);
            }
        }
        methods
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [TransferKind::Read, TransferKind::Write, TransferKind::Copy]
            .into_iter()
            .flat_map(Self::catalog)
            .find(|method| method.name() == s)
            .ok_or_else(|| format!("Unknown method '{}'", s))
    }
}

/// Timing summary for one method at one buffer size
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrialSummary {
    /// Label, e.g. `read_async_plain 64 Kb`
    pub label: String,
    /// Method name
    pub method: String,
    /// Buffer size in bytes, for buffered engines
    pub buffer_size: Option<usize>,
    /// Mean latency in milliseconds
    pub mean_ms: f64,
    /// Population standard deviation in milliseconds
    pub stddev_ms: f64,
    /// Individual samples in milliseconds
    pub samples_ms: Vec<f64>,
}

impl TrialSummary {
    /// Summarise a set of samples
    pub fn from_samples(
        label: impl Into<String>,
        method: &Method,
        buffer_size: Option<usize>,
        samples_ms: Vec<f64>,
    ) -> Self {
        let (mean_ms, stddev_ms) = mean_and_stddev(&samples_ms);
        Self {
            label: label.into(),
            method: method.name(),
            buffer_size,
            mean_ms,
            stddev_ms,
            samples_ms,
        }
    }

    /// One CSV report line: `label, mean, stddev`
    pub fn csv_line(&self) -> String {
        format!("{}, {:.6}, {:.6}", self.label, self.mean_ms, self.stddev_ms)
    }
}

/// Mean and population standard deviation; `(0, 0)` for no samples
pub fn mean_and_stddev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
