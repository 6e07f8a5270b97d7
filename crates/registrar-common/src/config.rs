//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Shared primitives and utilities for the service runtime."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::{parse_level, LogFormat};

/// Credit ceiling applied per student when no override is configured.
pub const DEFAULT_CREDIT_LIMIT: u32 = 18;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_notifications_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

fn default_channel_capacity() -> usize {
    256
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_credit_limit() -> u32 {
    DEFAULT_CREDIT_LIMIT
}

/// Primary configuration object for the Registrar runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "REGISTRAR_CONFIG";

    /// Load configuration from disk, respecting the `REGISTRAR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// When no candidate exists the defaults are used and `source` is `None`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let candidate = candidate.as_ref();
            if candidate.exists() {
                let config = Self::from_path(candidate)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(candidate.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        self.notifications.validate()?;
        self.enrollment.validate()?;
        if self.api.enabled && self.api.listen == self.notifications.listen {
            return Err(anyhow!(
                "api and notification servers cannot share listen address {}",
                self.api.listen
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when neither `REGISTRAR_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Write the daily rolling JSON file next to stdout.
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_logging_directory(),
            format: default_log_format(),
            file: true,
            file_prefix: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        parse_level(&self.level).context("logging.level")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    /// Upper bound on how long shutdown waits for in-flight requests.
    #[serde(default = "default_shutdown_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// WebSocket notification server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notifications_listen")]
    pub listen: SocketAddr,
    /// Frames buffered per subscriber before slow clients start lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            listen: default_notifications_listen(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(anyhow!("notifications.channel_capacity must be positive"));
        }
        Ok(())
    }
}

/// Enrollment policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    #[serde(default = "default_true")]
    pub enforce_credit_limit: bool,
    #[serde(default = "default_credit_limit")]
    pub credit_limit: u32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            enforce_credit_limit: true,
            credit_limit: DEFAULT_CREDIT_LIMIT,
        }
    }
}

impl EnrollmentConfig {
    /// Effective credit ceiling, `None` when the policy is switched off.
    pub fn effective_credit_limit(&self) -> Option<u32> {
        self.enforce_credit_limit.then_some(self.credit_limit)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enforce_credit_limit && self.credit_limit == 0 {
            return Err(anyhow!(
                "enrollment.credit_limit must be positive when enforced"
            ));
        }
        Ok(())
    }
}

/// Entity store persistence settings. Both paths are optional; without them the
/// store is purely in-memory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.enrollment.effective_credit_limit(), Some(18));
        assert_eq!(config.api.listen, default_api_listen());
        assert_eq!(config.api.shutdown_grace, Duration::from_secs(5));
        assert!(config.store.snapshot_path.is_none());
    }

    #[test]
    fn credit_limit_can_be_disabled() {
        let config: AppConfig = r#"
            [enrollment]
            enforce_credit_limit = false
            credit_limit = 0
        "#
        .parse()
        .unwrap();
        assert_eq!(config.enrollment.effective_credit_limit(), None);
    }

    #[test]
    fn zero_enforced_credit_limit_is_rejected() {
        let err = r#"
            [enrollment]
            credit_limit = 0
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("credit_limit"));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let err = r#"
            [logging]
            level = "registrar_core=loud"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("logging.level"));
    }

    #[test]
    fn shared_listen_address_is_rejected() {
        let err = r#"
            [api]
            listen = "127.0.0.1:7000"
            [notifications]
            listen = "127.0.0.1:7000"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("share listen address"));
    }

    #[test]
    fn load_with_source_reads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registrar.toml");
        fs::write(
            &path,
            r#"
                [store]
                snapshot_path = "data/catalog.json"
                [api]
                shutdown_grace = 12
            "#,
        )
        .unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(
            loaded.config.store.snapshot_path,
            Some(PathBuf::from("data/catalog.json"))
        );
        assert_eq!(loaded.config.api.shutdown_grace, Duration::from_secs(12));
    }
}
