use std::env;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{GroupError, Result};
use crate::models::ExpectedStatus;

pub const DEFAULT_TEST_URL: &str = "https://www.gstatic.com/generate_204";
pub const DEFAULT_TEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_FAILED_TIMES: u32 = 5;
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Health checking defaults
    pub health: HealthCheckConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Per-probe timeout in milliseconds (default: 5000)
    pub timeout_ms: u64,
    /// Maximum simultaneous probes per health-check round (default: 10)
    pub concurrency: usize,
    /// Default probe interval in seconds for providers (default: 300)
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TEST_TIMEOUT_MS,
            concurrency: 10,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            health: HealthCheckConfig {
                timeout_ms: get_env_or("HEALTHCHECK_TIMEOUT_MS", "5000")
                    .parse()
                    .map_err(|_| {
                        GroupError::InvalidConfig(
                            "HEALTHCHECK_TIMEOUT_MS must be a valid number".into(),
                        )
                    })?,
                concurrency: get_env_or("HEALTHCHECK_CONCURRENCY", "10")
                    .parse::<usize>()
                    .map_err(|_| {
                        GroupError::InvalidConfig(
                            "HEALTHCHECK_CONCURRENCY must be a valid number".into(),
                        )
                    })?
                    .max(1),
                interval_secs: get_env_or("HEALTHCHECK_INTERVAL_SECS", "300")
                    .parse()
                    .map_err(|_| {
                        GroupError::InvalidConfig(
                            "HEALTHCHECK_INTERVAL_SECS must be a valid number".into(),
                        )
                    })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }
}

/// Kind of proxy group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Select,
    Fallback,
    LoadBalance,
    UrlTest,
}

impl GroupKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "select" | "selector" => Some(Self::Select),
            "fallback" => Some(Self::Fallback),
            "load-balance" | "loadbalance" | "load_balance" => Some(Self::LoadBalance),
            "url-test" | "urltest" | "url_test" => Some(Self::UrlTest),
            _ => None,
        }
    }
}

/// Options recognized on a proxy group
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    /// One or more regexes separated by a backtick, in priority order
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub exclude_filter: String,
    /// Adapter type names separated by `|`
    #[serde(default)]
    pub exclude_type: String,
    #[serde(default = "default_test_url", alias = "url")]
    pub test_url: String,
    #[serde(default)]
    pub expected_status: String,
    /// Health check interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_true")]
    pub lazy: bool,
    /// Probe timeout and failure window in milliseconds
    #[serde(default = "default_test_timeout")]
    pub test_timeout: u64,
    #[serde(default = "default_max_failed_times")]
    pub max_failed_times: u32,
    #[serde(default)]
    pub tolerance: u16,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub disable_udp: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub icon: String,
}

fn default_test_url() -> String {
    DEFAULT_TEST_URL.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

fn default_test_timeout() -> u64 {
    DEFAULT_TEST_TIMEOUT_MS
}

fn default_max_failed_times() -> u32 {
    DEFAULT_MAX_FAILED_TIMES
}

impl GroupConfig {
    /// Minimal config for a group of the given type with all defaults applied
    pub fn new(name: impl Into<String>, group_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_type: group_type.into(),
            filter: String::new(),
            exclude_filter: String::new(),
            exclude_type: String::new(),
            test_url: default_test_url(),
            expected_status: String::new(),
            interval: DEFAULT_INTERVAL_SECS,
            lazy: true,
            test_timeout: DEFAULT_TEST_TIMEOUT_MS,
            max_failed_times: DEFAULT_MAX_FAILED_TIMES,
            tolerance: 0,
            strategy: None,
            disable_udp: false,
            hidden: false,
            icon: String::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kind(&self) -> Result<GroupKind> {
        GroupKind::from_str(&self.group_type).ok_or_else(|| {
            GroupError::InvalidConfig(format!(
                "group {}: unknown type {}",
                self.name, self.group_type
            ))
        })
    }

    /// Validate options that must be correct before the group is usable
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GroupError::InvalidConfig("group name is empty".into()));
        }
        self.kind()?;

        let test_url = self.test_url.trim();
        if !test_url.is_empty() {
            Url::parse(test_url).map_err(|e| {
                GroupError::InvalidConfig(format!(
                    "group {}: test-url must be a valid URL: {}",
                    self.name, e
                ))
            })?;
        }

        self.expected_status()?;
        Ok(())
    }

    pub fn expected_status(&self) -> Result<ExpectedStatus> {
        ExpectedStatus::parse(&self.expected_status)
    }

    pub fn test_timeout(&self) -> Duration {
        let ms = if self.test_timeout == 0 {
            DEFAULT_TEST_TIMEOUT_MS
        } else {
            self.test_timeout
        };
        Duration::from_millis(ms)
    }

    pub fn max_failed_times(&self) -> u32 {
        if self.max_failed_times == 0 {
            DEFAULT_MAX_FAILED_TIMES
        } else {
            self.max_failed_times
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Get environment variable with a default value
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "HEALTHCHECK_TIMEOUT_MS",
        "HEALTHCHECK_CONCURRENCY",
        "HEALTHCHECK_INTERVAL_SECS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.health, HealthCheckConfig::default());
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("HEALTHCHECK_TIMEOUT_MS", "2500");
        env::set_var("HEALTHCHECK_CONCURRENCY", "0");
        env::set_var("LOG_FORMAT", "pretty");

        let config = Config::from_env().unwrap();

        assert_eq!(config.health.timeout_ms, 2500);
        assert_eq!(config.health.concurrency, 1);
        assert_eq!(config.health.interval_secs, 300);
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_config_from_env_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("HEALTHCHECK_TIMEOUT_MS", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, GroupError::InvalidConfig(_)));
    }

    #[test]
    fn test_group_config_defaults_from_json() {
        let config = GroupConfig::from_json(r#"{"name": "auto", "type": "url-test"}"#).unwrap();

        assert_eq!(config.kind().unwrap(), GroupKind::UrlTest);
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert_eq!(config.test_timeout(), Duration::from_millis(5000));
        assert_eq!(config.max_failed_times(), 5);
        assert_eq!(config.tolerance, 0);
        assert!(config.lazy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_group_config_kebab_case_options() {
        let config = GroupConfig::from_json(
            r#"{
                "name": "hk",
                "type": "load-balance",
                "filter": "HK`Hong Kong",
                "exclude-filter": "expire",
                "exclude-type": "direct|reject",
                "url": "http://cp.cloudflare.com",
                "expected-status": "204",
                "test-timeout": 0,
                "max-failed-times": 3,
                "strategy": "round-robin",
                "disable-udp": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.kind().unwrap(), GroupKind::LoadBalance);
        assert_eq!(config.filter, "HK`Hong Kong");
        assert_eq!(config.exclude_type, "direct|reject");
        assert_eq!(config.test_url, "http://cp.cloudflare.com");
        assert_eq!(config.test_timeout(), Duration::from_millis(5000));
        assert_eq!(config.max_failed_times(), 3);
        assert_eq!(config.strategy.as_deref(), Some("round-robin"));
        assert!(config.disable_udp);
        assert!(config.expected_status().unwrap().check(204));
    }

    #[test]
    fn test_group_config_validation_errors() {
        let config = GroupConfig::new("x", "random-group");
        assert!(matches!(
            config.validate(),
            Err(GroupError::InvalidConfig(_))
        ));

        let mut config = GroupConfig::new("x", "fallback");
        config.test_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(GroupError::InvalidConfig(_))
        ));

        let mut config = GroupConfig::new("x", "fallback");
        config.expected_status = "2xx".to_string();
        assert!(matches!(
            config.validate(),
            Err(GroupError::InvalidExpectedStatus(_))
        ));
    }
}
