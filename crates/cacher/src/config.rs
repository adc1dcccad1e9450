use std::time::Duration;

use cacher_core::LockOptions;
use cacher_redis::RedisEndpoint;
use serde::{Deserialize, Serialize};

use crate::manager::ManagerSettings;

/// Longest accepted TTL or lock lease (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Accepted values for `logging.level`.
pub const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacherConfig {
    /// Global kill-switch: when true nothing reaches the cache or lock store
    #[serde(default)]
    pub disable_caching: bool,
    #[serde(default)]
    pub mode: CacheMode,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CacherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.cache.nil_ttl_secs == 0 {
            return Err("cache.nil_ttl_secs must be > 0".into());
        }
        if self.cache.default_ttl_secs > MAX_TTL_SECS {
            return Err(format!("cache.default_ttl_secs must be <= {MAX_TTL_SECS}"));
        }
        if self.cache.nil_ttl_secs > self.cache.default_ttl_secs {
            return Err("cache.nil_ttl_secs must be <= cache.default_ttl_secs".into());
        }
        if self.cache.fan_out_concurrency == 0 {
            return Err("cache.fan_out_concurrency must be > 0".into());
        }
        if self.lock.tries == 0 {
            return Err("lock.tries must be > 0".into());
        }
        if self.lock.lease_ms == 0 {
            return Err("lock.lease_ms must be > 0".into());
        }
        if self.lock.lease_ms > MAX_TTL_SECS * 1000 {
            return Err(format!("lock.lease_ms must be <= {} ms", MAX_TTL_SECS * 1000));
        }
        if self.lock.retry_delay_ms > self.lock.max_retry_delay_ms {
            return Err("lock.retry_delay_ms must be <= lock.max_retry_delay_ms".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {LOG_LEVELS:?}"));
        }
        if self.mode == CacheMode::Redis && !self.disable_caching {
            if self.redis.cache_url.is_empty() {
                return Err("redis.cache_url must not be empty".into());
            }
            if self.redis.lock_url.is_empty() {
                return Err("redis.lock_url must not be empty".into());
            }
            if self.redis.max_active_conn == 0 {
                return Err("redis.max_active_conn must be > 0".into());
            }
            if self.redis.dial_timeout_ms == 0
                || self.redis.read_timeout_ms == 0
                || self.redis.write_timeout_ms == 0
            {
                return Err("redis timeouts must be > 0".into());
            }
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }

    pub fn nil_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.nil_ttl_secs)
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            default_ttl: self.default_ttl(),
            nil_ttl: self.nil_ttl(),
            fan_out_concurrency: self.cache.fan_out_concurrency,
            disabled: self.disable_caching,
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            lease: Duration::from_millis(self.lock.lease_ms),
            tries: self.lock.tries,
            retry_delay: Duration::from_millis(self.lock.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.lock.max_retry_delay_ms),
        }
    }

    pub fn cache_endpoint(&self) -> RedisEndpoint {
        self.redis.endpoint(&self.redis.cache_url)
    }

    pub fn lock_endpoint(&self) -> RedisEndpoint {
        self.redis.endpoint(&self.redis.lock_url)
    }
}

/// Where cached values and fill locks live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Shared Redis instances (multi-instance deployments)
    #[default]
    Redis,
    /// In-process stores (single instance, tests)
    Local,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::Redis => write!(f, "redis"),
            CacheMode::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL for items stored without an explicit one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// TTL of the negative-cache marker
    #[serde(default = "default_nil_ttl_secs")]
    pub nil_ttl_secs: u64,

    /// Concurrent reads issued by multi-key lookups
    #[serde(default = "default_fan_out_concurrency")]
    pub fan_out_concurrency: usize,
}

fn default_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_nil_ttl_secs() -> u64 {
    300
}

fn default_fan_out_concurrency() -> usize {
    8
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            nil_ttl_secs: default_nil_ttl_secs(),
            fan_out_concurrency: default_fan_out_concurrency(),
        }
    }
}

/// Redis endpoints and pool sizing.
///
/// The cache and the lock store are expected to be distinct instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_cache_url")]
    pub cache_url: String,

    #[serde(default = "default_lock_url")]
    pub lock_url: String,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Connection pool size (per instance)
    #[serde(default = "default_max_active_conn")]
    pub max_active_conn: usize,
}

fn default_cache_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_lock_url() -> String {
    "redis://localhost:6380".to_string()
}

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_io_timeout_ms() -> u64 {
    2000
}

fn default_max_active_conn() -> usize {
    50
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            cache_url: default_cache_url(),
            lock_url: default_lock_url(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            max_active_conn: default_max_active_conn(),
        }
    }
}

impl RedisConfig {
    fn endpoint(&self, url: &str) -> RedisEndpoint {
        RedisEndpoint {
            url: url.to_string(),
            max_size: self.max_active_conn,
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

/// Fill-lock lease and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_tries")]
    pub tries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_lease_ms() -> u64 {
    60_000
}

fn default_tries() -> u32 {
    8
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_max_retry_delay_ms() -> u64 {
    1000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ms: default_lease_ms(),
            tries: default_tries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CacherConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<CacherConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("cacher.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., CACHER__REDIS__CACHE_URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("CACHER")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CacherConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<CacherConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = CacherConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_ttl(), Duration::from_secs(900));
        assert_eq!(cfg.mode, CacheMode::Redis);
        assert!(!cfg.disable_caching);
    }

    #[test]
    fn test_nil_ttl_cannot_exceed_default_ttl() {
        let mut cfg = CacherConfig::default();
        cfg.cache.nil_ttl_secs = cfg.cache.default_ttl_secs + 1;
        assert!(cfg.validate().unwrap_err().contains("nil_ttl_secs"));
    }

    #[test]
    fn test_ttl_and_lease_upper_bounds() {
        let mut cfg = CacherConfig::default();
        cfg.mode = CacheMode::Local;
        cfg.cache.default_ttl_secs = u64::MAX;
        cfg.cache.nil_ttl_secs = u64::MAX;
        assert!(cfg.validate().unwrap_err().contains("default_ttl_secs"));

        cfg.cache.default_ttl_secs = MAX_TTL_SECS;
        cfg.cache.nil_ttl_secs = MAX_TTL_SECS;
        assert!(cfg.validate().is_ok());

        cfg.lock.lease_ms = u64::MAX;
        assert!(cfg.validate().unwrap_err().contains("lease_ms"));
    }

    #[test]
    fn test_redis_urls_only_required_in_redis_mode() {
        let mut cfg = CacherConfig::default();
        cfg.redis.cache_url.clear();
        assert!(cfg.validate().is_err());

        cfg.mode = CacheMode::Local;
        assert!(cfg.validate().is_ok());

        cfg.mode = CacheMode::Redis;
        cfg.disable_caching = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut cfg = CacherConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_endpoints_are_distinct() {
        let cfg = CacherConfig::default();
        let cache = cfg.cache_endpoint();
        let lock = cfg.lock_endpoint();
        assert_ne!(cache.url, lock.url);
        assert_eq!(cache.max_size, 50);
        assert_eq!(lock.write_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_lock_options_mapping() {
        let cfg = CacherConfig::default();
        let options = cfg.lock_options();
        assert_eq!(options.lease, Duration::from_secs(60));
        assert_eq!(options.tries, 8);
        assert_eq!(options.retry_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_cache_mode_display() {
        assert_eq!(CacheMode::Redis.to_string(), "redis");
        assert_eq!(CacheMode::Local.to_string(), "local");
    }
}
