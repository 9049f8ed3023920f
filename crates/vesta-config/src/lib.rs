//! Configuration for the vesta store and overlay, plus `tracing` initialisation.
//!
//! Configs are TOML files. Every section and key is optional; unknown keys are rejected so typos
//! surface instead of being silently ignored.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VestaConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding the records, names and attributes files.
    #[serde(default = "StoreConfig::default_dir")]
    pub dir: PathBuf,

    /// Discard and recreate a store that is corrupt, from another format version, or was not
    /// closed cleanly. When disabled, opening such a store is an error.
    #[serde(default = "default_true")]
    pub rebuild_on_corruption: bool,
}

impl StoreConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from(".vesta")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            rebuild_on_corruption: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    /// Descend into cached subdirectories during a refresh pass.
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { recursive: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentConfig {
    /// Byte budget of the in-memory file contents cache. `0` disables it.
    #[serde(default = "ContentConfig::default_cache_max_bytes")]
    pub cache_max_bytes: usize,
}

impl ContentConfig {
    fn default_cache_max_bytes() -> usize {
        16 * 1024 * 1024
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: Self::default_cache_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for all vesta crates.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr.
    #[serde(default = "default_true")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while stderr stays active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    /// `level` with surrounding whitespace removed; an empty value falls back to `info` and
    /// `warning` is accepted for `warn`.
    fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            Self::default_level()
        } else if level.eq_ignore_ascii_case("warning") {
            "warn".to_owned()
        } else {
            level.to_owned()
        }
    }

    /// The effective filter: `level` (a bare level or directives such as
    /// `vesta.refresh=trace,info`) followed by `RUST_LOG`, so the environment wins on overlap.
    ///
    /// Malformed directives are dropped; with nothing usable left the filter is `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let mut directives = self.directives();
        if let Ok(env) = std::env::var("RUST_LOG") {
            if !env.trim().is_empty() {
                directives.push(',');
                directives.push_str(env.trim());
            }
        }
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(directives)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

impl VestaConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

static TRACING_INIT: Once = Once::new();

/// Initializes structured `tracing` logging.
///
/// Safe to call multiple times; only the first call installs a global subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            // `TestWriter` keeps log lines inside libtest's captured output.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(Mutex::new(file)));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "vesta.config",
                    path = %path.display(),
                    "failed to open log file; file logging is disabled"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = VestaConfig::load_from_str("").unwrap();
        assert_eq!(config, VestaConfig::default());
        assert!(config.store.rebuild_on_corruption);
        assert!(config.refresh.recursive);
        assert_eq!(config.content.cache_max_bytes, 16 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.store.dir, PathBuf::from(".vesta"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = VestaConfig::load_from_str(
            r#"
                [store]
                dir = "/var/cache/vesta"
                rebuild_on_corruption = false

                [refresh]
                recursive = false

                [content]
                cache_max_bytes = 0

                [logging]
                level = "debug"
                json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.store.dir, PathBuf::from("/var/cache/vesta"));
        assert!(!config.store.rebuild_on_corruption);
        assert!(!config.refresh.recursive);
        assert_eq!(config.content.cache_max_bytes, 0);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.logging.stderr);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = VestaConfig::load_from_str("[store]\ndirr = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)), "unexpected error: {err:?}");

        let err = VestaConfig::load_from_str("[storage]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)), "unexpected error: {err:?}");
    }

    fn logging(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_owned(),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn level_synonyms_are_normalized() {
        assert_eq!(logging(" WARNING ").directives(), "warn");
        assert_eq!(logging("").directives(), "info");
        assert_eq!(
            logging("vesta.refresh=trace").directives(),
            "vesta.refresh=trace"
        );
    }
}
