//! PoolConfig — sizing, timing, and backend settings for a connection pool.
//!
//! Two on-disk formats are accepted:
//!
//! - the legacy line-oriented `key=value` file (`host=`, `passwd=`,
//!   `min_connection=`, `time_out=` in milliseconds, `alive_time=` in seconds);
//! - a TOML file with a `[pool]` table whose fields mirror [`PoolSection`].
//!
//! Both are merged over [`PoolConfig::default`] and validated before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::Target;
use crate::error::ConfigError;

/// Configuration for a [`ConnectionPool`](crate::ConnectionPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Backend host name or IP (default: "127.0.0.1").
    pub host: String,
    /// Backend port (default: 3306).
    pub port: u16,
    /// User handed to the driver.
    pub user: String,
    /// Password handed to the driver, if any.
    pub password: Option<String>,
    /// Database / schema name handed to the driver.
    pub database: String,
    /// Handles opened at start-up; the reaper never shrinks below this (default: 2).
    pub min_size: usize,
    /// Hard upper bound on idle + on-loan handles (default: 10).
    pub max_size: usize,
    /// Default wait for [`ConnectionPool::acquire`](crate::ConnectionPool::acquire) (default: 1s).
    pub acquire_timeout: Duration,
    /// Idle duration after which a surplus handle is reaped (default: 60s).
    pub max_idle: Duration,
    /// Reaper tick (default: 3s).
    pub reap_interval: Duration,
    /// First replenisher backoff after a failed connect (default: 100ms).
    pub retry_base_backoff: Duration,
    /// Ceiling for the replenisher's exponential backoff (default: 10s).
    pub retry_max_backoff: Duration,
    /// Probe liveness before handing a handle out (default: false).
    pub test_on_acquire: bool,
    /// Probe liveness when a handle comes back (default: false).
    pub test_on_release: bool,
    /// Driver-level connect timeout (default: 5s).
    pub connect_timeout: Duration,
    /// Driver-level read timeout on established links (default: 30s).
    pub read_timeout: Duration,
    /// Wrap links in TLS (default: false).
    pub use_tls: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: String::new(),
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_millis(1000),
            max_idle: Duration::from_secs(60),
            reap_interval: Duration::from_secs(3),
            retry_base_backoff: Duration::from_millis(100),
            retry_max_backoff: Duration::from_secs(10),
            test_on_acquire: false,
            test_on_release: false,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            use_tls: false,
        }
    }
}

impl PoolConfig {
    /// Builder method: set the pool size bounds.
    pub fn with_size(self, min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..self
        }
    }

    /// Builder method: set backend address.
    pub fn with_backend(self, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..self
        }
    }

    /// Builder method: set credentials and database name.
    pub fn with_credentials(self, user: &str, password: Option<&str>, database: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.map(str::to_string),
            database: database.to_string(),
            ..self
        }
    }

    /// Builder method: set the default acquire timeout.
    pub fn with_acquire_timeout(self, acquire_timeout: Duration) -> Self {
        Self {
            acquire_timeout,
            ..self
        }
    }

    /// Builder method: set the idle threshold and reaper tick.
    pub fn with_idle_reaping(self, max_idle: Duration, reap_interval: Duration) -> Self {
        Self {
            max_idle,
            reap_interval,
            ..self
        }
    }

    /// Builder method: set the replenisher's backoff bounds.
    pub fn with_retry_backoff(self, base: Duration, max: Duration) -> Self {
        Self {
            retry_base_backoff: base,
            retry_max_backoff: max,
            ..self
        }
    }

    /// Builder method: enable liveness probes on acquire and/or release.
    pub fn with_liveness_checks(self, on_acquire: bool, on_release: bool) -> Self {
        Self {
            test_on_acquire: on_acquire,
            test_on_release: on_release,
            ..self
        }
    }

    /// Builder method: toggle TLS on driver links.
    pub fn with_tls(self, use_tls: bool) -> Self {
        Self { use_tls, ..self }
    }

    /// The backend address and credentials handed to the driver.
    pub fn target(&self) -> Target {
        Target {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }

    /// Reject configurations the pool cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Invalid(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::Invalid(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "acquire_timeout must be non-zero".to_string(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "reap_interval must be non-zero".to_string(),
            ));
        }
        if self.retry_base_backoff > self.retry_max_backoff {
            return Err(ConfigError::Invalid(format!(
                "retry base backoff ({:?}) exceeds max backoff ({:?})",
                self.retry_base_backoff, self.retry_max_backoff
            )));
        }
        Ok(())
    }

    /// Load from a file, choosing the format by extension (`.toml` → TOML,
    /// anything else → legacy `key=value`).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(&content)
        } else {
            Self::from_kv_str(&content)
        }
    }

    /// Parse the TOML format (`[pool]` table).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: PoolFileConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config = file.pool.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Parse the legacy `key=value` format.
    ///
    /// Blank lines and lines starting with `#` are skipped; unknown keys are
    /// logged and ignored.
    pub fn from_kv_str(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Parse(format!(
                    "line {line_no}: expected key=value, got {line:?}"
                )));
            };
            let key = key.trim();
            let value = value.trim();
            let field = KvField {
                key,
                value,
                line: line_no,
            };

            match key {
                "host" => config.host = value.to_string(),
                "port" => config.port = field.number()?,
                "user" => config.user = value.to_string(),
                "passwd" | "password" => {
                    config.password = (!value.is_empty()).then(|| value.to_string());
                }
                "db" | "database" => config.database = value.to_string(),
                "min_connection" => config.min_size = field.number()?,
                "max_connection" => config.max_size = field.number()?,
                "time_out" => config.acquire_timeout = Duration::from_millis(field.number()?),
                "alive_time" => config.max_idle = Duration::from_secs(field.number()?),
                "reap_interval" => config.reap_interval = Duration::from_millis(field.number()?),
                "retry_base_ms" => {
                    config.retry_base_backoff = Duration::from_millis(field.number()?);
                }
                "retry_max_ms" => {
                    config.retry_max_backoff = Duration::from_millis(field.number()?);
                }
                "connect_timeout" => {
                    config.connect_timeout = Duration::from_millis(field.number()?);
                }
                "read_timeout" => config.read_timeout = Duration::from_millis(field.number()?),
                "test_on_acquire" => config.test_on_acquire = field.flag()?,
                "test_on_release" => config.test_on_release = field.flag()?,
                "tls" => config.use_tls = field.flag()?,
                other => {
                    tracing::warn!(key = other, line = line_no, "ignoring unknown pool config key");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// One `key=value` line being decoded.
struct KvField<'a> {
    key: &'a str,
    value: &'a str,
    line: usize,
}

impl KvField<'_> {
    fn invalid(&self) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.key.to_string(),
            line: self.line,
            value: self.value.to_string(),
        }
    }

    fn number<T: std::str::FromStr>(&self) -> Result<T, ConfigError> {
        self.value.parse().map_err(|_| self.invalid())
    }

    fn flag(&self) -> Result<bool, ConfigError> {
        match self.value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(self.invalid()),
        }
    }
}

// ── TOML representation ──────────────────────────────────────────────

/// Top-level TOML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolFileConfig {
    #[serde(default)]
    pub pool: PoolSection,
}

/// The `[pool]` table. Every field is optional and falls back to the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub acquire_timeout_ms: Option<u64>,
    pub max_idle_secs: Option<u64>,
    pub reap_interval_ms: Option<u64>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub test_on_acquire: Option<bool>,
    pub test_on_release: Option<bool>,
    pub tls: Option<bool>,
}

impl PoolSection {
    fn apply(self, base: PoolConfig) -> PoolConfig {
        let millis = |v: Option<u64>, fallback: Duration| v.map(Duration::from_millis).unwrap_or(fallback);
        PoolConfig {
            host: self.host.unwrap_or(base.host),
            port: self.port.unwrap_or(base.port),
            user: self.user.unwrap_or(base.user),
            password: self.password.or(base.password),
            database: self.database.unwrap_or(base.database),
            min_size: self.min_size.unwrap_or(base.min_size),
            max_size: self.max_size.unwrap_or(base.max_size),
            acquire_timeout: millis(self.acquire_timeout_ms, base.acquire_timeout),
            max_idle: self
                .max_idle_secs
                .map(Duration::from_secs)
                .unwrap_or(base.max_idle),
            reap_interval: millis(self.reap_interval_ms, base.reap_interval),
            retry_base_backoff: millis(self.retry_base_ms, base.retry_base_backoff),
            retry_max_backoff: millis(self.retry_max_ms, base.retry_max_backoff),
            connect_timeout: millis(self.connect_timeout_ms, base.connect_timeout),
            read_timeout: millis(self.read_timeout_ms, base.read_timeout),
            test_on_acquire: self.test_on_acquire.unwrap_or(base.test_on_acquire),
            test_on_release: self.test_on_release.unwrap_or(base.test_on_release),
            use_tls: self.tls.unwrap_or(base.use_tls),
        }
    }
}
