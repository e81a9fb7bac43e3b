//! Configuration loader utilities

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override configuration values
pub const ENV_PREFIX: &str = "TWINBUF";

/// Configuration loader with common loading patterns
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the first file found in the default locations
    pub fn load_default() -> ConfigResult<Config> {
        let mut builder = ConfigBuilder::new().add_defaults();
        if let Some(path) = Self::config_exists() {
            builder = builder.add_source_file(path);
        }
        builder.add_env_prefix(ENV_PREFIX).build()
    }

    /// Load configuration from a specific file, which must exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Configuration file not found",
                ),
            });
        }

        ConfigBuilder::new()
            .add_defaults()
            .add_source_file(path)
            .add_env_prefix(ENV_PREFIX)
            .build()
    }

    /// Load from `path` when given, otherwise from the default locations
    pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Save configuration to a file, choosing the format by extension
    pub fn save_to_file<P: AsRef<Path>>(config: &Config, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = Self::render(config, path.extension().and_then(|ext| ext.to_str()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render `config` as `yaml` (default), `toml` or `json`
    pub fn render(config: &Config, format: Option<&str>) -> ConfigResult<String> {
        match format {
            Some("toml") => toml::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize to TOML: {}", e),
            }),
            Some("json") => {
                serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                    message: format!("Failed to serialize to JSON: {}", e),
                })
            }
            _ => serde_yaml::to_string(config).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize to YAML: {}", e),
            }),
        }
    }

    /// Configuration file paths in order of preference
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("twinbuf.yaml"),
            PathBuf::from("twinbuf.yml"),
            PathBuf::from("twinbuf.toml"),
            PathBuf::from("twinbuf.json"),
        ];

        if let Some(config_dir) = user_config_dir() {
            let dir = config_dir.join("twinbuf");
            paths.push(dir.join("config.yaml"));
            paths.push(dir.join("config.toml"));
        }

        paths
    }

    /// First existing configuration file in the default locations
    pub fn config_exists() -> Option<PathBuf> {
        Self::default_config_paths()
            .into_iter()
            .find(|path| path.exists())
    }
}

fn user_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("saved.yaml")]
    #[case("saved.toml")]
    #[case("saved.json")]
    fn test_save_and_load(#[case] name: &str) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(name);

        let mut saved = Config::default();
        saved.benchmark.trials = twinbuf_types::TrialCount::new(4).unwrap();
        saved.benchmark.buffer_sizes_kib = vec![8, 64];
        ConfigLoader::save_to_file(&saved, &config_path).unwrap();

        let loaded = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.benchmark.trials.get(), 4);
        assert_eq!(loaded.benchmark.buffer_sizes_kib, vec![8, 64]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let error = ConfigLoader::load_from_file(temp_dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(error, ConfigError::Io { .. }));
    }

    #[test]
    fn test_render_formats() {
        let config = Config::default();
        assert!(ConfigLoader::render(&config, None).unwrap().contains("trials: 10"));
        assert!(ConfigLoader::render(&config, Some("toml")).unwrap().contains("[benchmark]"));
        assert!(ConfigLoader::render(&config, Some("json")).unwrap().contains("\"needle\": 255"));
    }
}
