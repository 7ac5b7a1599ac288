//! Structured faults returned by the remote service.

use crate::error_code::FaultCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Per-item result of a multi-request call: the domain response or a fault.
pub type Outcome<R> = std::result::Result<R, Fault>;

/// A structured failure reported by the remote service, either for one item of a
/// batch or for the whole call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
    /// Raw service error code, if the service exposed one (e.g. `"0x80072322"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Server-mandated backoff, for throttling faults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Any extra metadata the service attached to the fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            service_code: None,
            http_status: None,
            retry_after_ms: None,
            details: None,
        }
    }

    /// Build a fault from a raw service error code, classifying it via
    /// [`FaultCode::from_service_code`].
    pub fn from_service(service_code: impl Into<String>, message: impl Into<String>) -> Self {
        let service_code = service_code.into();
        let mut fault = Self::new(FaultCode::from_service_code(&service_code), message);
        fault.service_code = Some(service_code);
        fault
    }

    /// Build a fault from an HTTP status.
    pub fn from_http(status: u16, message: impl Into<String>) -> Self {
        let mut fault = Self::new(FaultCode::from_http_status(status), message);
        fault.http_status = Some(status);
        fault
    }

    /// Shorthand for a throttling fault with a server-mandated delay.
    pub fn throttled(retry_after: Duration) -> Self {
        Self::new(FaultCode::Throttled, "request throttled by service").with_retry_after(retry_after)
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.code.name(), self.message)?;
        if let Some(ref sc) = self.service_code {
            write!(f, " [service code {}]", sc)?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {}
