//! Configuration builder for layered configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use twinbuf_types::{Alignment, TrialCount};

/// Keys whose environment values are comma-separated lists
const LIST_KEYS: &[&str] = &["benchmark.buffer_sizes_kib", "benchmark.methods"];

/// Configuration builder for loading configuration from multiple sources
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    env_separator: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Defaults,
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Add default configuration values
    pub fn add_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Add a configuration file source; missing files are skipped
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Set environment variable separator (default: "__")
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> ConfigResult<Config> {
        // Defaults always form the base layer
        let mut defaults_value = serde_yaml::to_value(Config::default())
            .map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize defaults: {}", e),
            })?;
        // Layered arrays merge element-wise, so list defaults come from serde instead
        if let Some(benchmark) = defaults_value
            .get_mut("benchmark")
            .and_then(serde_yaml::Value::as_mapping_mut)
        {
            for key in LIST_KEYS {
                if let Some(field) = key.strip_prefix("benchmark.") {
                    benchmark.remove(field);
                }
            }
        }
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&defaults_value)?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    let mut environment = Environment::with_prefix(prefix)
                        .separator(&self.env_separator)
                        .try_parsing(true)
                        .list_separator(",");
                    for key in LIST_KEYS {
                        environment = environment.with_list_parse_key(key);
                    }
                    self.inner = self.inner.add_source(environment);
                }
                ConfigSource::Defaults => {}
            }
        }

        let config: Config = self.inner.build()?.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Detect file format from extension
    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    /// Validate the configuration
    pub fn validate(config: &Config) -> ConfigResult<()> {
        let benchmark = &config.benchmark;

        if benchmark.buffer_sizes_kib.is_empty() {
            return Err(ConfigError::validation(
                "At least one buffer size must be configured",
            ));
        }
        benchmark.buffer_sizes()?;

        TrialCount::new(benchmark.trials.get())
            .map_err(|e| ConfigError::invalid_value("benchmark.trials", e))?;
        Alignment::new(config.engine.alignment.get())
            .map_err(|e| ConfigError::invalid_value("engine.alignment", e))?;

        for name in &benchmark.methods {
            name.parse::<twinbuf_types::Method>()
                .map_err(|e| ConfigError::invalid_value("benchmark.methods", e))?;
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;
    use twinbuf_types::WaitStrategy;

    fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().add_defaults().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_builder_yaml_file() {
        let file = config_file(
            ".yaml",
            r#"
benchmark:
  trials: 3
  buffer_sizes_kib: [64, 256]
  purge_cache: false
engine:
  wait_strategy: yield
"#,
        );

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap();

        assert_eq!(config.benchmark.trials.get(), 3);
        assert_eq!(config.benchmark.buffer_sizes_kib, vec![64, 256]);
        assert!(!config.benchmark.purge_cache);
        assert_eq!(config.engine.wait_strategy, WaitStrategy::Yield);
        assert_eq!(config.benchmark.needle, 0xFF);
    }

    #[test]
    fn test_builder_toml_file() {
        let file = config_file(
            ".toml",
            r#"
[engine]
alignment = 512

[paths]
data_dir = "/tmp/twinbuf"
"#,
        );

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap();

        assert_eq!(config.engine.alignment.get(), 512);
        assert_eq!(config.paths.data_dir, PathBuf::from("/tmp/twinbuf"));
    }

    #[test]
    fn test_builder_rejects_bad_alignment() {
        let file = config_file(".yaml", "engine:\n  alignment: 3000\n");
        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_empty_sizes() {
        let file = config_file(".yaml", "benchmark:\n  buffer_sizes_kib: []\n");
        let error = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("At least one buffer size"));
    }

    #[test]
    fn test_builder_rejects_unknown_method() {
        let file = config_file(".yaml", "benchmark:\n  methods: [read_warp_speed]\n");
        let error = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("benchmark.methods"));
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file("/nonexistent/twinbuf.yaml")
            .build()
            .unwrap();
        assert_eq!(config, Config::default());
    }
}
