//! Remote-service seam.
//!
//! The engine never talks to the network itself. It hands each physical batch to a
//! [`BatchTransport`], which performs one multi-request call with continue-on-error
//! semantics and returns one [`Outcome`] per submitted request, in order.
//!
//! Batch-scoped settings (the identity the call runs as, automation to bypass) are
//! passed explicitly in an [`ExecutionContext`] built per batch.

mod scripted;

pub use scripted::{RecordedBatch, ScriptedTransport};

use crate::fault::{Fault, Outcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settings applied to a whole remote batch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Unique id of this physical submission (fresh on every retry).
    pub batch_id: Uuid,
    /// Identity the call runs as: the group key shared by every operation in the batch.
    pub run_as: Option<String>,
    /// Downstream automation the service should skip for this call.
    pub bypass_automation: Vec<String>,
}

impl ExecutionContext {
    pub fn new(run_as: Option<String>, bypass_automation: Vec<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            run_as,
            bypass_automation,
        }
    }
}

/// The multi-request call of the remote service.
///
/// Contract:
/// - `Err(fault)`: the call failed as a whole and no per-item results exist.
/// - `Ok(outcomes)`: exactly one outcome per request, in request order; a fault at
///   one position does not affect the others.
#[async_trait]
pub trait BatchTransport<Req, Resp>: Send + Sync
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn execute(
        &self,
        requests: &[Req],
        ctx: &ExecutionContext,
    ) -> std::result::Result<Vec<Outcome<Resp>>, Fault>;

    fn name(&self) -> &'static str {
        "transport"
    }
}
