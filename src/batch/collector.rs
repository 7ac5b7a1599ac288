//! Batch collector: accumulates operations into group-homogeneous batches.

use crate::fault::Fault;
use crate::operation::Operation;
use tokio::time::Instant;

/// An operation plus the engine's bookkeeping for it.
pub(crate) struct PendingOperation<O> {
    pub op: O,
    pub retries_remaining: u32,
    /// Number of submissions so far.
    pub attempts: u32,
    /// Set only while the operation waits in the retry scheduler.
    pub next_retry_at: Option<Instant>,
    /// Most recent unhandled fault; reported if the budget runs out.
    pub last_fault: Option<Fault>,
}

impl<O: Operation> PendingOperation<O> {
    pub fn new(op: O, max_retries: u32) -> Self {
        Self {
            op,
            retries_remaining: max_retries,
            attempts: 0,
            next_retry_at: None,
            last_fault: None,
        }
    }

    pub fn request_count(&self) -> usize {
        self.op.requests().len()
    }

    pub fn group(&self) -> Option<&str> {
        self.op.group_key()
    }
}

/// A batch ready for submission. Every operation shares `group`.
pub(crate) struct PendingBatch<O> {
    pub group: Option<String>,
    pub operations: Vec<PendingOperation<O>>,
}

impl<O: Operation> PendingBatch<O> {
    pub fn request_count(&self) -> usize {
        self.operations.iter().map(PendingOperation::request_count).sum()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Pending list for the active group.
///
/// Only one group is open at a time. An operation from another group closes the
/// open batch first, so a physical batch never mixes group keys. Size is counted
/// in wire requests: an operation that does not fit closes the open batch and
/// starts the next one, and a batch that reaches `max_batch_size` is closed
/// immediately.
pub(crate) struct BatchCollector<O> {
    max_batch_size: usize,
    active_group: Option<String>,
    items: Vec<PendingOperation<O>>,
    request_count: usize,
}

impl<O: Operation> BatchCollector<O> {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            active_group: None,
            items: Vec::new(),
            request_count: 0,
        }
    }

    /// Add an operation, returning the batches it closed, in submission order.
    pub fn add(&mut self, item: PendingOperation<O>) -> Vec<PendingBatch<O>> {
        let mut ready = Vec::new();

        if !self.items.is_empty() && self.active_group.as_deref() != item.group() {
            ready.extend(self.drain());
        }
        if self.request_count + item.request_count() > self.max_batch_size {
            ready.extend(self.drain());
        }
        if self.items.is_empty() {
            self.active_group = item.group().map(str::to_owned);
        }

        self.request_count += item.request_count();
        self.items.push(item);

        if self.request_count >= self.max_batch_size {
            ready.extend(self.drain());
        }
        ready
    }

    /// Close the open batch regardless of size.
    pub fn drain(&mut self) -> Option<PendingBatch<O>> {
        if self.items.is_empty() {
            return None;
        }
        self.request_count = 0;
        Some(PendingBatch {
            group: self.active_group.take(),
            operations: std::mem::take(&mut self.items),
        })
    }

    /// Drop everything pending, returning how many operations were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.request_count = 0;
        self.active_group = None;
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
