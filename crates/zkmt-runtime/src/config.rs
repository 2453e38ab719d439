//! Session configuration
//!
//! Library defaults, overridden by environment variables, overridden by
//! builder calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use zkmt_runtime::config::SessionConfig;
//!
//! let config = SessionConfig::from_env()
//!     .hosts("zk1:2181,zk2:2181")
//!     .session_timeout(Duration::from_secs(30));
//! ```

use std::str::FromStr;
use std::time::Duration;
use zkmt_core::{ZkError, ZkResult};

pub mod defaults {
    pub const HOSTS: &str = "127.0.0.1:2181";
    pub const SESSION_TIMEOUT_MS: u64 = 10_000;
    pub const MAX_POLL_MS: u64 = 1_000;
    pub const CLOSE_TIMEOUT_MS: u64 = 1_500;
    pub const THREAD_NAME_PREFIX: &str = "zkmt";
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Comma separated `host:port` list handed to the session engine
    pub hosts: String,
    /// Requested session timeout
    pub session_timeout: Duration,
    /// Upper bound on one readiness wait of the I/O thread
    pub max_poll_interval: Duration,
    /// How long close() lets the engine flush its send queue
    pub close_timeout: Duration,
    /// Prefix for the I/O and completion thread names
    pub thread_name_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl SessionConfig {
    /// Library defaults only, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            hosts: defaults::HOSTS.to_string(),
            session_timeout: Duration::from_millis(defaults::SESSION_TIMEOUT_MS),
            max_poll_interval: Duration::from_millis(defaults::MAX_POLL_MS),
            close_timeout: Duration::from_millis(defaults::CLOSE_TIMEOUT_MS),
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Defaults with environment overrides.
    ///
    /// - `ZKMT_HOSTS`
    /// - `ZKMT_SESSION_TIMEOUT_MS`
    /// - `ZKMT_MAX_POLL_MS`
    /// - `ZKMT_CLOSE_TIMEOUT_MS`
    /// - `ZKMT_THREAD_PREFIX`
    pub fn from_env() -> Self {
        let base = Self::builtin();
        Self {
            hosts: env_or("ZKMT_HOSTS", base.hosts),
            session_timeout: Duration::from_millis(env_or(
                "ZKMT_SESSION_TIMEOUT_MS",
                defaults::SESSION_TIMEOUT_MS,
            )),
            max_poll_interval: Duration::from_millis(env_or(
                "ZKMT_MAX_POLL_MS",
                defaults::MAX_POLL_MS,
            )),
            close_timeout: Duration::from_millis(env_or(
                "ZKMT_CLOSE_TIMEOUT_MS",
                defaults::CLOSE_TIMEOUT_MS,
            )),
            thread_name_prefix: env_or("ZKMT_THREAD_PREFIX", base.thread_name_prefix),
        }
    }

    pub fn hosts(mut self, hosts: impl Into<String>) -> Self {
        self.hosts = hosts.into();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> ZkResult<()> {
        if self.hosts.trim().is_empty() {
            return Err(ZkError::BadArguments("hosts is empty"));
        }
        if self.session_timeout.is_zero() {
            return Err(ZkError::BadArguments("session timeout is zero"));
        }
        if self.max_poll_interval.is_zero() {
            return Err(ZkError::BadArguments("max poll interval is zero"));
        }
        Ok(())
    }

    pub(crate) fn io_thread_name(&self) -> String {
        format!("{}-io", self.thread_name_prefix)
    }

    pub(crate) fn completion_thread_name(&self) -> String {
        format!("{}-completion", self.thread_name_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let c = SessionConfig::builtin();
        assert_eq!(c.hosts, defaults::HOSTS);
        assert_eq!(c.session_timeout, Duration::from_secs(10));
        assert!(c.validate().is_ok());
        assert_eq!(c.io_thread_name(), "zkmt-io");
    }

    #[test]
    fn test_builder_overrides() {
        let c = SessionConfig::builtin()
            .hosts("a:1,b:2")
            .max_poll_interval(Duration::from_millis(20))
            .thread_name_prefix("t");
        assert_eq!(c.hosts, "a:1,b:2");
        assert_eq!(c.max_poll_interval, Duration::from_millis(20));
        assert_eq!(c.completion_thread_name(), "t-completion");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(SessionConfig::builtin().hosts(" ").validate().is_err());
        assert!(SessionConfig::builtin()
            .session_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SessionConfig::builtin()
            .max_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ZKMT_CLOSE_TIMEOUT_MS", "250");
        let c = SessionConfig::from_env();
        assert_eq!(c.close_timeout, Duration::from_millis(250));
        std::env::set_var("ZKMT_CLOSE_TIMEOUT_MS", "garbage");
        let c = SessionConfig::from_env();
        assert_eq!(c.close_timeout, Duration::from_millis(defaults::CLOSE_TIMEOUT_MS));
        std::env::remove_var("ZKMT_CLOSE_TIMEOUT_MS");
    }
}
