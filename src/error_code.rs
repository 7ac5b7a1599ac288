//! Canonical fault codes reported by multi-request write services.
//!
//! Every [`crate::Fault`] carries one of these codes. The table gives each code a
//! stable string, a snake_case name, a category and a default retry hint, so the
//! throttling classifier and operation fault handlers can reason about faults
//! without parsing service-specific messages.
//!
//! ## Code Categories
//!
//! | Prefix | Category    | Description                              |
//! |--------|-------------|------------------------------------------|
//! | F1xxx  | client      | Request-side errors                      |
//! | F2xxx  | throttling  | Service protection and rate limits       |
//! | F3xxx  | server      | Service-side and transport errors        |
//! | F4xxx  | operational | Lifecycle and state conflicts            |
//! | F9xxx  | unknown     | Catch-all / unclassified                 |
//!
//! ## Example
//!
//! ```rust
//! use bulk_dispatch::error_code::FaultCode;
//!
//! let code = FaultCode::from_service_code("0x80072322");
//! assert_eq!(code, FaultCode::ServiceProtectionLimit);
//! assert!(code.is_throttling());
//! assert_eq!(code.category(), "throttling");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical fault code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// F1001: Malformed request, invalid attribute values, or missing required fields
    InvalidRequest,
    /// F1002: Invalid, expired, or missing credentials
    Authentication,
    /// F1003: Valid credentials but insufficient privileges
    PermissionDenied,
    /// F1004: Target record does not exist
    NotFound,
    /// F1005: A record with the same key already exists
    DuplicateRecord,
    /// F2001: Request rate limit exceeded
    Throttled,
    /// F2002: Service protection limit (request count, execution time, concurrency) hit
    ServiceProtectionLimit,
    /// F3001: Internal error on the service side
    ServerError,
    /// F3002: Service temporarily unavailable
    ServiceUnavailable,
    /// F3003: Request timed out before a response was received
    Timeout,
    /// F3004: Response could not be correlated with the submitted requests
    InvalidResponse,
    /// F4001: State conflict (e.g., concurrent modification)
    Conflict,
    /// F4002: Request was cancelled by the client
    Cancelled,
    /// F9999: Fault could not be classified
    Unknown,
}

impl FaultCode {
    /// Returns the canonical code string (e.g., `"F1001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "F1001",
            Self::Authentication => "F1002",
            Self::PermissionDenied => "F1003",
            Self::NotFound => "F1004",
            Self::DuplicateRecord => "F1005",
            Self::Throttled => "F2001",
            Self::ServiceProtectionLimit => "F2002",
            Self::ServerError => "F3001",
            Self::ServiceUnavailable => "F3002",
            Self::Timeout => "F3003",
            Self::InvalidResponse => "F3004",
            Self::Conflict => "F4001",
            Self::Cancelled => "F4002",
            Self::Unknown => "F9999",
        }
    }

    /// Returns the standard name (e.g., `"invalid_request"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::DuplicateRecord => "duplicate_record",
            Self::Throttled => "throttled",
            Self::ServiceProtectionLimit => "service_protection_limit",
            Self::ServerError => "server_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the service asked the caller to back off before retrying.
    #[inline]
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttled | Self::ServiceProtectionLimit)
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Informational only: the engine retries every non-throttling fault while the
    /// operation has budget left.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled
                | Self::ServiceProtectionLimit
                | Self::ServerError
                | Self::ServiceUnavailable
                | Self::Timeout
                | Self::InvalidResponse
                | Self::Conflict
        )
    }

    /// Returns the category: `"client"`, `"throttling"`, `"server"`, `"operational"`, or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest
            | Self::Authentication
            | Self::PermissionDenied
            | Self::NotFound
            | Self::DuplicateRecord => "client",
            Self::Throttled | Self::ServiceProtectionLimit => "throttling",
            Self::ServerError | Self::ServiceUnavailable | Self::Timeout | Self::InvalidResponse => {
                "server"
            }
            Self::Conflict | Self::Cancelled => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a service error code to a `FaultCode`.
    ///
    /// Accepts the standard names (`"not_found"`), common aliases
    /// (`"rate_limit_exceeded"`, `"object_does_not_exist"`) and the hexadecimal
    /// codes write services report for service protection and missing records.
    /// Matching is case-insensitive; unrecognized codes map to `Unknown`.
    pub fn from_service_code(service_code: &str) -> Self {
        let normalized = service_code.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "invalid_request" | "invalid_argument" | "validation_error" => Self::InvalidRequest,
            "authentication" | "unauthorized" | "invalid_token" => Self::Authentication,
            "permission_denied" | "forbidden" | "privilege_denied" => Self::PermissionDenied,
            "not_found" | "object_does_not_exist" | "0x80040217" => Self::NotFound,
            "duplicate_record" | "duplicate" | "0x80040237" => Self::DuplicateRecord,
            "throttled" | "rate_limited" | "rate_limit_exceeded" | "too_many_requests" => {
                Self::Throttled
            }
            // Request count, combined execution time and concurrent request limits.
            "service_protection_limit" | "0x80072322" | "0x80072321" | "0x80072326" => {
                Self::ServiceProtectionLimit
            }
            "server_error" | "internal_error" => Self::ServerError,
            "service_unavailable" | "unavailable" => Self::ServiceUnavailable,
            "timeout" | "sql_timeout" => Self::Timeout,
            "invalid_response" => Self::InvalidResponse,
            "conflict" | "concurrency_version_mismatch" => Self::Conflict,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// Maps an HTTP status code to the most likely `FaultCode`.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            412 => Self::Conflict,
            429 => Self::Throttled,
            500 => Self::ServerError,
            502 | 503 => Self::ServiceUnavailable,
            504 => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
