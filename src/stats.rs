use serde::{Deserialize, Serialize};

/// Running counters for one engine instance.
///
/// Facts only: the engine never acts on these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub batches_submitted: u64,
    pub batches_vetoed: u64,
    /// Batches whose call failed as a whole (no per-item outcomes).
    pub batch_failures: u64,
    pub requests_submitted: u64,
    pub operations_enqueued: u64,
    pub operations_completed: u64,
    pub operations_errored: u64,
    /// Retries scheduled for non-throttling faults.
    pub operations_retried: u64,
    /// Retries scheduled for throttling faults.
    pub operations_throttled: u64,
    pub operations_vetoed: u64,
    /// Operations dropped because the engine was cancelled.
    pub operations_discarded: u64,
}

impl EngineStats {
    /// Operations that reached a terminal state or were dropped.
    pub fn operations_settled(&self) -> u64 {
        self.operations_completed
            + self.operations_errored
            + self.operations_vetoed
            + self.operations_discarded
    }
}
