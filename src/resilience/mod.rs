//! 弹性模块：识别服务端限流并给出退避时间。
//!
//! # Resilience Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`throttling`] | Classifies faults as throttling and picks the backoff |
//!
//! Throttling is handled separately from ordinary faults: a throttled operation
//! is rescheduled after the delay the service asked for and never consumes its
//! retry budget.
//!
//! ```rust
//! use bulk_dispatch::resilience::throttling::{DefaultThrottlingClassifier, ThrottlingClassifier};
//! use bulk_dispatch::Fault;
//! use std::time::Duration;
//!
//! let classifier = DefaultThrottlingClassifier::default();
//! let verdict = classifier.classify(&Fault::throttled(Duration::from_secs(2)));
//! assert_eq!(verdict.retry_after(), Some(Duration::from_secs(2)));
//! ```

pub mod throttling;
