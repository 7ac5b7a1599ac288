//! 批量调度模块：收集操作、分批提交，并按故障类型安排重试。
//!
//! # Batch Dispatch Module
//!
//! This module turns a stream of logical operations into size-bounded physical
//! batches, submits them through a [`BatchTransport`](crate::transport::BatchTransport),
//! and routes every per-request outcome back to the operation that produced it.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchEngine`] | Single-owner engine: enqueue, flush, drain |
//! | [`SharedBatchEngine`] | Mutex-guarded engine for several producers |
//! | [`BatchGate`] | Optional per-batch confirmation hook |
//! | [`RetryEntry`] | Read-only view of a scheduled retry |
//! | [`DrainOutcome`] | How a drain ended |
//!
//! ## Fault routing
//!
//! - **Throttling**: the whole operation is rescheduled after the server's delay;
//!   the retry budget is untouched.
//! - **Handled**: the operation's own handler accepts the fault; nothing happens.
//! - **Other**: retried after a fixed delay while budget remains, then reported once.
//!
//! ## Example
//!
//! ```rust
//! use bulk_dispatch::{BatchEngine, EngineConfig, OperationContext, ScriptedTransport};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> bulk_dispatch::Result<()> {
//! type Op = OperationContext<u32, u32, u32>;
//!
//! let transport = Arc::new(ScriptedTransport::per_item(|r: &u32| Ok(r * 2)));
//! let mut engine = BatchEngine::<Op>::builder(transport)
//!     .config(EngineConfig::new().with_batch_size(50))
//!     .build()?;
//!
//! for id in 0..120u32 {
//!     engine.enqueue(Op::request(id, id)).await?;
//! }
//! engine.flush().await;
//! engine.drain().await;
//! assert_eq!(engine.stats().batches_submitted, 3);
//! # Ok(())
//! # }
//! ```

mod collector;
mod engine;
mod executor;
mod retry;

pub use engine::{BatchEngine, BatchEngineBuilder, DrainOutcome, FailureSink, SharedBatchEngine};
pub use executor::{BatchGate, BatchPreview, FnGate};
pub use retry::RetryEntry;
