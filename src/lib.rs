//! # bulk-dispatch
//!
//! 面向远程服务多请求接口的批量调度与重试引擎。
//!
//! Batch dispatch and retry engine for services that expose a multi-request call
//! with continue-on-error semantics.
//!
//! ## Overview
//!
//! Callers enqueue logical operations. The engine packs their wire requests into
//! size-bounded batches, never mixing operations that must run under different
//! identities, submits each batch through a [`BatchTransport`], and routes every
//! per-request outcome back to the operation that produced it.
//!
//! ## Core Behaviour
//!
//! - **Batch-Aware**: batch size counts wire requests; an operation never straddles two batches
//! - **Group-Isolated**: a change of group key closes the open batch
//! - **Throttle-Tolerant**: throttling reschedules work after the server's delay, budget untouched
//! - **Bounded Retries**: other faults are retried a fixed number of times, then reported once
//! - **Cancellable**: a stop signal wakes any backoff wait and drops queued work
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulk_dispatch::{
//!     BatchEngine, EngineConfig, Fault, FaultCode, OperationContext, OperationFailure,
//!     ScriptedTransport,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bulk_dispatch::Result<()> {
//!     type Delete = OperationContext<String, (), u64>;
//!
//!     let transport = Arc::new(ScriptedTransport::per_item(|req: &String| {
//!         if req.ends_with("(7)") {
//!             Err(Fault::new(FaultCode::NotFound, "record does not exist"))
//!         } else {
//!             Ok(())
//!         }
//!     }));
//!
//!     let mut engine = BatchEngine::<Delete>::builder(transport)
//!         .config(EngineConfig::default().with_env_overrides()?)
//!         .on_error(|id: u64, failure: OperationFailure| {
//!             eprintln!("record {id} failed: {}", failure.fault);
//!         })
//!         .build()?;
//!
//!     for id in 0..500u64 {
//!         let op = Delete::delete(id, format!("DELETE accounts({id})")).ignore_missing();
//!         engine.enqueue(op).await?;
//!     }
//!     engine.flush().await;
//!     engine.drain().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Collector, executor, retry scheduler and the engine itself |
//! | [`operation`] | The [`Operation`] trait and the closure-based [`OperationContext`] |
//! | [`transport`] | The [`BatchTransport`] seam and an in-memory transport |
//! | [`resilience`] | Throttling classification |
//! | [`fault`] | Per-request and per-call faults |
//! | [`error_code`] | Standard fault codes |
//! | [`config`] | Engine configuration (code, file, environment) |
//! | [`stats`] | Engine counters |

pub mod batch;
pub mod config;
pub mod error_code;
pub mod fault;
pub mod operation;
pub mod resilience;
pub mod stats;
pub mod transport;

pub use batch::{
    BatchEngine, BatchEngineBuilder, BatchGate, BatchPreview, DrainOutcome, FailureSink, FnGate,
    RetryEntry, SharedBatchEngine,
};
pub use config::EngineConfig;
pub use error_code::FaultCode;
pub use fault::{Fault, Outcome};
pub use operation::{Operation, OperationContext, OperationFailure};
pub use resilience::throttling::{
    DefaultThrottlingClassifier, Throttling, ThrottlingClassifier, ThrottlingConfig,
};
pub use stats::EngineStats;
pub use transport::{BatchTransport, ExecutionContext, RecordedBatch, ScriptedTransport};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
