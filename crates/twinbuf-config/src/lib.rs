//! Configuration management for twinbuf
//!
//! Settings are merged from, in increasing priority:
//!
//! 1. built-in defaults
//! 2. an optional YAML, TOML or JSON file
//! 3. environment variables such as `TWINBUF__BENCHMARK__TRIALS=5`
//!
//! # Examples
//!
//! ```rust
//! use twinbuf_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("twinbuf.yaml")
//!     .add_env_prefix("TWINBUF")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Trials per method: {}", config.benchmark.trials.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use twinbuf_types::{Alignment, BufferSize, TrialCount, WaitStrategy, NEEDLE};

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Buffer sizes, in KiB, swept by the harness by default
pub const DEFAULT_BUFFER_SIZES_KIB: &[usize] = &[
    4, 8, 12, 16, 24, 32, 40, 48, 56, 64, 256, 1024, 4096, 16384, 65536, 262_144,
];

/// Main configuration structure for twinbuf
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trial loop settings
    pub benchmark: BenchmarkConfig,
    /// Transfer engine settings
    pub engine: EngineConfig,
    /// File locations
    pub paths: PathsConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Trial loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Timed repetitions per method and buffer size
    pub trials: TrialCount,
    /// Buffer sizes to sweep, in KiB
    pub buffer_sizes_kib: Vec<usize>,
    /// Sentinel byte counted by read trials
    pub needle: u8,
    /// Drop the page cache before every trial
    pub purge_cache: bool,
    /// Only run methods whose name appears here; empty runs all
    pub methods: Vec<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            trials: TrialCount::default(),
            buffer_sizes_kib: DEFAULT_BUFFER_SIZES_KIB.to_vec(),
            needle: NEEDLE,
            purge_cache: true,
            methods: Vec::new(),
        }
    }
}

impl BenchmarkConfig {
    /// Validated buffer sizes, in sweep order
    pub fn buffer_sizes(&self) -> ConfigResult<Vec<BufferSize>> {
        self.buffer_sizes_kib
            .iter()
            .map(|&kib| {
                BufferSize::from_kib(kib)
                    .map_err(|e| ConfigError::invalid_value("benchmark.buffer_sizes_kib", e))
            })
            .collect()
    }
}

/// Transfer engine configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Alignment of every slot buffer
    pub alignment: Alignment,
    /// How a blocked pipeline side waits
    pub wait_strategy: WaitStrategy,
}

/// File locations used by the harness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding generated data files
    pub data_dir: PathBuf,
    /// Target of write trials
    pub write_target: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            write_target: PathBuf::from("data/test.bin"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when neither flags nor `RUST_LOG` set one
    pub level: String,
    /// Emit log lines as JSON
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
