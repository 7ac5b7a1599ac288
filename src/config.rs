//! Engine configuration.
//!
//! Configuration can be built in code, loaded from a YAML or JSON file, and
//! adjusted through environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `BULK_DISPATCH_BATCH_SIZE` | `batch_size` |
//! | `BULK_DISPATCH_MAX_RETRIES` | `max_retries` |
//! | `BULK_DISPATCH_RETRY_DELAY_MS` | `retry_delay_ms` |
//! | `BULK_DISPATCH_THROTTLE_FALLBACK_MS` | `throttle_fallback_ms` |
//! | `BULK_DISPATCH_THROTTLE_MAX_MS` | `throttle_max_ms` |
//!
//! ```rust
//! use bulk_dispatch::EngineConfig;
//!
//! let cfg = EngineConfig::from_yaml_str("batch_size: 250\nmax_retries: 5\n").unwrap();
//! assert_eq!(cfg.batch_size, 250);
//! assert_eq!(cfg.max_retries, 5);
//! assert!(cfg.validate().is_ok());
//! ```

use crate::resilience::throttling::ThrottlingConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Largest batch the multi-request call accepts.
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum wire requests per physical batch. `1` disables batching.
    pub batch_size: usize,
    /// Retries per operation for non-throttling faults.
    pub max_retries: u32,
    /// Fixed backoff before retrying a non-throttling fault.
    pub retry_delay_ms: u64,
    /// Backoff for throttling faults that carry no retry-after.
    pub throttle_fallback_ms: u64,
    /// Ceiling for server-reported throttling delays.
    pub throttle_max_ms: u64,
    /// Downstream automation every batch asks the service to skip.
    pub bypass_automation: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 1_000,
            throttle_fallback_ms: 5_000,
            throttle_max_ms: 300_000,
            bypass_automation: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_throttle_fallback(mut self, delay: Duration) -> Self {
        self.throttle_fallback_ms = duration_ms(delay);
        self
    }

    pub fn with_bypass_automation<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass_automation = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn throttling(&self) -> ThrottlingConfig {
        ThrottlingConfig::new()
            .with_fallback_delay(Duration::from_millis(self.throttle_fallback_ms))
            .with_max_delay(Duration::from_millis(self.throttle_max_ms))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            other => Err(Error::configuration_with_context(
                "unsupported configuration file type",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(format!("extension: {:?}", other))
                    .with_source("config_loader"),
            )),
        }
    }

    /// Apply `BULK_DISPATCH_*` environment overrides.
    ///
    /// Set but unparsable values are rejected rather than ignored.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<usize>("BULK_DISPATCH_BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = env_parse::<u32>("BULK_DISPATCH_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("BULK_DISPATCH_RETRY_DELAY_MS")? {
            self.retry_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("BULK_DISPATCH_THROTTLE_FALLBACK_MS")? {
            self.throttle_fallback_ms = v;
        }
        if let Some(v) = env_parse::<u64>("BULK_DISPATCH_THROTTLE_MAX_MS")? {
            self.throttle_max_ms = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::configuration_with_context(
                "batch size out of range",
                ErrorContext::new()
                    .with_field_path("batch_size")
                    .with_details(format!(
                        "expected 1..={}, got {}",
                        MAX_BATCH_SIZE, self.batch_size
                    ))
                    .with_source("engine_config"),
            ));
        }
        if self.throttle_max_ms < self.throttle_fallback_ms {
            return Err(Error::configuration_with_context(
                "throttle ceiling below fallback delay",
                ErrorContext::new()
                    .with_field_path("throttle_max_ms")
                    .with_details(format!(
                        "{} < throttle_fallback_ms {}",
                        self.throttle_max_ms, self.throttle_fallback_ms
                    ))
                    .with_source("engine_config"),
            ));
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::configuration_with_context(
                "invalid environment override",
                ErrorContext::new()
                    .with_field_path(key)
                    .with_details(format!("value: {:?}", raw))
                    .with_source("config_loader"),
            )
        }),
        Err(_) => Ok(None),
    }
}
