//! Configuration module for Faultline.
//!
//! Provides typed configuration structs that map to the YAML
//! configuration file, with loading, validation, defaults, and a
//! builder for programmatic use.
//!
//! Every path a component touches comes from here at construction
//! time; there is no implicit process-wide cache-path lookup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Faultline host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub uploader: UploaderConfig,
    pub watchdog: WatchdogSection,
    pub relay: RelaySection,
    pub logging: LoggingConfig,
}

/// Persisted state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// App-private cache directory holding the `breadcrumbs` and
    /// `context` store files.
    pub cache_dir: PathBuf,
    /// Bound for the persisted breadcrumb ring.
    pub max_breadcrumbs: usize,
    /// Milliseconds that buffered store writes are coalesced before a
    /// disk flush.
    pub flush_debounce_ms: u64,
}

/// Crash dump discovery and upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Output directory of the out-of-process crash writer.
    pub crashes_dir: PathBuf,
    /// Remote collector endpoint. `None` disables native crash upload.
    pub collector: Option<CollectorConfig>,
    /// Days a dump may age before it is evicted instead of uploaded.
    pub retention_days: u32,
    /// Maximum dumps uploaded per host-process run.
    pub max_per_session: u32,
    /// Seconds between discovery/upload polls.
    pub poll_interval_secs: u64,
}

/// Remote collector coordinates.
///
/// Expands to `{scheme}://{host}/api/{project}/minidump?sentry_key={key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub scheme: String,
    pub host: String,
    pub project: String,
    pub key: String,
}

impl CollectorConfig {
    /// The minidump upload endpoint for this collector.
    pub fn minidump_url(&self) -> String {
        format!(
            "{}://{}/api/{}/minidump?sentry_key={}",
            self.scheme, self.host, self.project, self.key
        )
    }
}

/// ANR watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSection {
    /// Expected liveness poll cadence from content processes, in
    /// milliseconds.
    pub poll_interval_ms: u64,
    /// Stall duration beyond the poll cadence that counts as ANR.
    pub anr_threshold_ms: u64,
    /// Whether ANR events carry a captured stack trace.
    pub capture_stack_trace: bool,
}

/// Transport selection for the content-to-host relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Point-to-point channel only
    Direct,
    /// Reserved-scheme request interception only
    Intercepted,
    /// Prefer the channel, fall back to interception
    Combined,
}

/// Relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    pub mode: RelayMode,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/faultline/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("faultline")
            .join("config.yaml")
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("~/.cache"))
        .join("faultline")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_breadcrumbs: crate::domain::breadcrumb::DEFAULT_MAX_BREADCRUMBS,
            flush_debounce_ms: 500,
        }
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            crashes_dir: default_cache_dir().join("crashes"),
            collector: None,
            retention_days: 30,
            max_per_session: 10,
            poll_interval_secs: 60,
        }
    }
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            anr_threshold_ms: 5000,
            capture_stack_trace: false,
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            mode: RelayMode::Combined,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"watchdog.anr_threshold_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `uploader.collector.scheme`.
const VALID_SCHEMES: &[&str] = &["http", "https"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- storage ---
        if self.storage.max_breadcrumbs == 0 {
            errors.push(ValidationError {
                field: "storage.max_breadcrumbs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- uploader ---
        if self.uploader.retention_days == 0 {
            errors.push(ValidationError {
                field: "uploader.retention_days".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.uploader.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "uploader.poll_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Some(collector) = &self.uploader.collector {
            if !VALID_SCHEMES.contains(&collector.scheme.as_str()) {
                errors.push(ValidationError {
                    field: "uploader.collector.scheme".into(),
                    message: format!(
                        "invalid scheme '{}'; valid options: {}",
                        collector.scheme,
                        VALID_SCHEMES.join(", ")
                    ),
                });
            }
            for (name, value) in [
                ("host", &collector.host),
                ("project", &collector.project),
                ("key", &collector.key),
            ] {
                if value.is_empty() {
                    errors.push(ValidationError {
                        field: format!("uploader.collector.{name}"),
                        message: "must not be empty".into(),
                    });
                }
            }
        }

        // --- watchdog ---
        if self.watchdog.poll_interval_ms == 0 {
            errors.push(ValidationError {
                field: "watchdog.poll_interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.watchdog.anr_threshold_ms == 0 {
            errors.push(ValidationError {
                field: "watchdog.anr_threshold_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- storage ---

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.cache_dir = dir;
        self
    }

    pub fn max_breadcrumbs(mut self, n: usize) -> Self {
        self.config.storage.max_breadcrumbs = n;
        self
    }

    pub fn flush_debounce_ms(mut self, ms: u64) -> Self {
        self.config.storage.flush_debounce_ms = ms;
        self
    }

    // --- uploader ---

    pub fn crashes_dir(mut self, dir: PathBuf) -> Self {
        self.config.uploader.crashes_dir = dir;
        self
    }

    pub fn collector(
        mut self,
        scheme: impl Into<String>,
        host: impl Into<String>,
        project: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.config.uploader.collector = Some(CollectorConfig {
            scheme: scheme.into(),
            host: host.into(),
            project: project.into(),
            key: key.into(),
        });
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.config.uploader.retention_days = days;
        self
    }

    pub fn max_per_session(mut self, n: u32) -> Self {
        self.config.uploader.max_per_session = n;
        self
    }

    pub fn upload_poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.uploader.poll_interval_secs = secs;
        self
    }

    // --- watchdog ---

    pub fn watchdog_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.watchdog.poll_interval_ms = ms;
        self
    }

    pub fn anr_threshold_ms(mut self, ms: u64) -> Self {
        self.config.watchdog.anr_threshold_ms = ms;
        self
    }

    pub fn capture_stack_trace(mut self, enabled: bool) -> Self {
        self.config.watchdog.capture_stack_trace = enabled;
        self
    }

    // --- relay ---

    pub fn relay_mode(mut self, mode: RelayMode) -> Self {
        self.config.relay.mode = mode;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
