//! Builder configuration.
//!
//! Settings come from `KCB_*` environment variables layered over defaults.
//! Empty or whitespace-only values are treated as unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::LogFormat;

/// Name of the per-task directory that holds build logs.
pub const RESULTS_DIR_NAME: &str = "osbslogs";

/// Configuration for the container build task handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuilderConfig {
    /// Task work directory; build logs are written under it.
    pub work_dir: PathBuf,

    /// Shared work area that metadata side-channel files are copied from.
    pub koji_work_dir: PathBuf,

    /// Cadence of the results-directory upload loop, in milliseconds.
    pub poll_interval_ms: u64,

    /// Number of attempts at reading the orchestrator log stream.
    pub log_retry_attempts: u32,

    /// Fixed delay between log stream attempts, in milliseconds.
    pub log_retry_delay_ms: u64,

    /// Allowed source locations as `host:path` patterns (`*` wildcards).
    ///
    /// An empty list allows every source.
    #[serde(default)]
    pub allowed_scms: Vec<String>,

    /// Fail instead of warning when a legacy single-platform submission would
    /// drop options the caller explicitly requested.
    #[serde(default)]
    pub strict_legacy_fallback: bool,

    /// Log output format used by the host process.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/tmp/koji"),
            koji_work_dir: PathBuf::from("/mnt/koji/work"),
            poll_interval_ms: 1_000,
            log_retry_attempts: 5,
            log_retry_delay_ms: 10_000,
            allowed_scms: Vec::new(),
            strict_legacy_fallback: false,
            log_format: LogFormat::default(),
        }
    }
}

impl BuilderConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration using `lookup` to resolve variable names.
    ///
    /// # Errors
    ///
    /// See [`BuilderConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        if let Some(dir) = env.string("KCB_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.string("KCB_KOJI_WORK_DIR") {
            config.koji_work_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env.u64("KCB_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = ms;
        }
        if let Some(attempts) = env.u32("KCB_LOG_RETRY_ATTEMPTS")? {
            config.log_retry_attempts = attempts;
        }
        if let Some(ms) = env.u64("KCB_LOG_RETRY_DELAY_MS")? {
            config.log_retry_delay_ms = ms;
        }
        if let Some(scms) = env.string("KCB_ALLOWED_SCMS") {
            config.allowed_scms = scms.split_whitespace().map(str::to_string).collect();
        }
        if let Some(strict) = env.bool("KCB_STRICT_LEGACY_FALLBACK")? {
            config.strict_legacy_fallback = strict;
        }
        if let Some(format) = env.string("KCB_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates settings that would otherwise stall or spin the task.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll interval or the retry attempt count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::config("KCB_POLL_INTERVAL_MS must be greater than zero"));
        }
        if self.log_retry_attempts == 0 {
            return Err(Error::config(
                "KCB_LOG_RETRY_ATTEMPTS must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Returns a copy rooted at a different work directory.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl AsRef<Path>) -> Self {
        self.work_dir = work_dir.as_ref().to_path_buf();
        self
    }

    /// Directory the log reader writes into and the upload loop watches.
    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.work_dir.join(RESULTS_DIR_NAME)
    }

    /// Upload loop cadence.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay between log stream attempts.
    #[must_use]
    pub const fn log_retry_delay(&self) -> Duration {
        Duration::from_millis(self.log_retry_delay_ms)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::config(format!("{name} must be a u64: {e}")))
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| Error::config(format!("{name} must be a u32: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Ok(Some(true)),
            "false" | "0" | "no" | "n" => Ok(Some(false)),
            _ => Err(Error::config(format!(
                "{name} must be a boolean (true/false/1/0)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_builder_constants() {
        let config = BuilderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BuilderConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.results_dir(), PathBuf::from("/var/tmp/koji/osbslogs"));
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = BuilderConfig::from_lookup(lookup(&[
            ("KCB_WORK_DIR", "/tmp/work"),
            ("KCB_POLL_INTERVAL_MS", "250"),
            ("KCB_LOG_RETRY_ATTEMPTS", "3"),
            ("KCB_LOG_RETRY_DELAY_MS", "5"),
            ("KCB_ALLOWED_SCMS", "pkgs.example.com:/containers/* git.example.com:*"),
            ("KCB_STRICT_LEGACY_FALLBACK", "yes"),
            ("KCB_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/tmp/work"));
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.log_retry_attempts, 3);
        assert_eq!(config.log_retry_delay(), Duration::from_millis(5));
        assert_eq!(config.allowed_scms.len(), 2);
        assert!(config.strict_legacy_fallback);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn blank_values_are_unset() {
        let config =
            BuilderConfig::from_lookup(lookup(&[("KCB_POLL_INTERVAL_MS", "   ")])).unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
    }

    #[test]
    fn rejects_unparseable_and_zero_values() {
        let err = BuilderConfig::from_lookup(lookup(&[("KCB_POLL_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("KCB_POLL_INTERVAL_MS must be a u64"));

        let err = BuilderConfig::from_lookup(lookup(&[("KCB_LOG_RETRY_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = BuilderConfig::from_lookup(lookup(&[("KCB_STRICT_LEGACY_FALLBACK", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("must be a boolean"));
    }
}
