//! twinbuf - double-buffered file transfer benchmark
//!
//! Times single-buffer, double-buffered, memory-mapped, AIO, `sendfile` and
//! `splice` transfers over a sweep of buffer sizes and prints one CSV line per method.

mod harness;
mod progress;
mod report;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use harness::Harness;
use report::BenchmarkReport;
use std::path::PathBuf;
use tracing::info;
use twinbuf_config::{Config, ConfigBuilder, ConfigLoader, LoggingConfig};
use twinbuf_io::data::{self, DEFAULT_SIZES_MIB};
use twinbuf_types::TrialCount;

const MIB: u64 = 1024 * 1024;

/// twinbuf - double-buffered file transfer benchmark
#[derive(Parser)]
#[command(
    name = "twinbuf",
    version = env!("CARGO_PKG_VERSION"),
    about = "Benchmark double-buffered file reads, writes and copies",
    long_about = "twinbuf times sequential file transfers that overlap one I/O operation\n\
                  with another through two aligned buffers, against single-buffer,\n\
                  memory-mapped, AIO, sendfile and splice baselines."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Emit results as JSON instead of CSV
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time every read method on a file
    Read {
        /// File to read
        path: PathBuf,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Time every write method producing a number of bytes
    Write {
        /// Number of bytes to write
        count: u64,
        /// Target file, overriding the configured one
        #[arg(long)]
        path: Option<PathBuf>,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Time every copy method between two files
    Copy {
        /// Source file
        source: PathBuf,
        /// Destination file
        destination: PathBuf,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Print the reference needle count of a file
    Check {
        /// File to scan
        path: PathBuf,
    },
    /// Generate random data files
    MakeData {
        /// Output directory, overriding the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
        /// File sizes in MiB
        #[arg(long, value_delimiter = ',')]
        sizes_mib: Vec<u64>,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

/// Overrides for one benchmark run
#[derive(Args)]
struct SweepArgs {
    /// Only run these methods, e.g. read_async_direct
    #[arg(long, value_delimiter = ',')]
    methods: Vec<String>,
    /// Buffer sizes in KiB
    #[arg(long, value_delimiter = ',')]
    sizes: Vec<usize>,
    /// Timed repetitions per method and size
    #[arg(long)]
    trials: Option<u32>,
    /// Keep the page cache between trials
    #[arg(long)]
    no_purge: bool,
}

impl SweepArgs {
    fn apply(self, config: &mut Config) -> Result<()> {
        let benchmark = &mut config.benchmark;
        if !self.methods.is_empty() {
            benchmark.methods = self.methods;
        }
        if !self.sizes.is_empty() {
            benchmark.buffer_sizes_kib = self.sizes;
        }
        if let Some(trials) = self.trials {
            benchmark.trials = TrialCount::new(trials).map_err(anyhow::Error::msg)?;
        }
        if self.no_purge {
            benchmark.purge_cache = false;
        }
        ConfigBuilder::validate(config)?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_logging(&cli, &config.logging)?;
    info!("twinbuf v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Read { path, sweep } => {
            sweep.apply(&mut config)?;
            announce(cli.quiet, "Reading", &path.display().to_string());
            let report = Harness::new(&config).read(&path)?;
            emit(&report, cli.json)?;
        }
        Commands::Write { count, path, sweep } => {
            sweep.apply(&mut config)?;
            if let Some(path) = path {
                config.paths.write_target = path;
            }
            announce(
                cli.quiet,
                "Writing",
                &format!("{} bytes to {}", count, config.paths.write_target.display()),
            );
            let report = Harness::new(&config).write(count)?;
            emit(&report, cli.json)?;
        }
        Commands::Copy {
            source,
            destination,
            sweep,
        } => {
            sweep.apply(&mut config)?;
            announce(
                cli.quiet,
                "Copying",
                &format!("{} to {}", source.display(), destination.display()),
            );
            let report = Harness::new(&config).copy(&source, &destination)?;
            emit(&report, cli.json)?;
        }
        Commands::Check { path } => {
            check_command(&path, config.benchmark.needle, cli.json)?;
        }
        Commands::MakeData { dir, sizes_mib } => {
            let dir = dir.unwrap_or_else(|| config.paths.data_dir.clone());
            let sizes = if sizes_mib.is_empty() {
                DEFAULT_SIZES_MIB.to_vec()
            } else {
                sizes_mib
            };
            make_data_command(&dir, &sizes, cli.quiet)?;
        }
        Commands::Config { default } => {
            let shown = if default { Config::default() } else { config };
            let format = if cli.json { Some("json") } else { None };
            print!("{}", ConfigLoader::render(&shown, format)?);
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    // Reports own stdout
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

fn announce(quiet: bool, action: &str, what: &str) {
    if !quiet {
        eprintln!(
            "{} {} {}",
            style("→").green().bold(),
            action,
            style(what).cyan()
        );
    }
}

fn emit(report: &BenchmarkReport, json: bool) -> Result<()> {
    let stdout = std::io::stdout().lock();
    if json {
        report.write_json(stdout)
    } else {
        report.write_csv(stdout).context("Failed to write report")
    }
}

fn check_command(path: &std::path::Path, needle: u8, json: bool) -> Result<()> {
    let count = twinbuf_io::count_reference(path, needle)
        .with_context(|| format!("Failed to scan '{}'", path.display()))?;

    if json {
        let value = serde_json::json!({
            "path": path.display().to_string(),
            "needle": needle,
            "count": count,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", count);
    }
    Ok(())
}

/// Byte length of a `size` MiB data file
fn mib_to_bytes(size: u64) -> Result<u64> {
    size
        .checked_mul(MIB)
        .with_context(|| format!("Data file size {} MiB does not fit in 64 bits", size))
}

fn make_data_command(dir: &std::path::Path, sizes_mib: &[u64], quiet: bool) -> Result<()> {
    let lengths = sizes_mib
        .iter()
        .map(|&size| mib_to_bytes(size))
        .collect::<Result<Vec<_>>>()?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create '{}'", dir.display()))?;

    for (&size, len) in sizes_mib.iter().zip(lengths) {
        let path = data::data_file_path(dir, size);
        let bar = progress::file_bar(&data::data_file_name(size), len, quiet);
        data::make_file(&path, len, |done| bar.set_position(done))
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        bar.finish_and_clear();

        if !quiet {
            eprintln!(
                "{} {} ({} MiB)",
                style("✓").green(),
                style(path.display()).cyan(),
                size
            );
        }
    }
    Ok(())
}
