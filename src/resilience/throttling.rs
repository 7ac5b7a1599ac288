//! Throttling classification.
//!
//! The classifier is the only input to the engine's timing decisions for throttled
//! work, so it is a trait: tests substitute a fixed classifier, deployments can map
//! service-specific fault shapes.

use crate::fault::Fault;
use std::time::Duration;

/// Result of classifying a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttling {
    /// The service asked the caller to wait `retry_after` before trying again.
    Throttled { retry_after: Duration },
    NotThrottled,
}

impl Throttling {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Throttling::Throttled { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Throttling::Throttled { retry_after } => Some(*retry_after),
            Throttling::NotThrottled => None,
        }
    }
}

/// Pure predicate over a fault: no I/O, no state.
pub trait ThrottlingClassifier: Send + Sync {
    fn classify(&self, fault: &Fault) -> Throttling;
}

impl<F> ThrottlingClassifier for F
where
    F: Fn(&Fault) -> Throttling + Send + Sync,
{
    fn classify(&self, fault: &Fault) -> Throttling {
        self(fault)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlingConfig {
    /// Delay used when a throttling fault carries no retry-after.
    pub fallback_delay: Duration,
    /// Upper bound applied to server-reported delays.
    pub max_delay: Duration,
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            fallback_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl ThrottlingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Classifies by fault code: `Throttled`, `ServiceProtectionLimit` and HTTP 429.
#[derive(Debug, Clone, Default)]
pub struct DefaultThrottlingClassifier {
    cfg: ThrottlingConfig,
}

impl DefaultThrottlingClassifier {
    pub fn new(cfg: ThrottlingConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ThrottlingConfig {
        &self.cfg
    }
}

impl ThrottlingClassifier for DefaultThrottlingClassifier {
    fn classify(&self, fault: &Fault) -> Throttling {
        let throttled = fault.code.is_throttling() || fault.http_status == Some(429);
        if !throttled {
            return Throttling::NotThrottled;
        }
        let retry_after = fault
            .retry_after()
            .unwrap_or(self.cfg.fallback_delay)
            .min(self.cfg.max_delay);
        Throttling::Throttled { retry_after }
    }
}
