//! Retry scheduler: operations waiting out a backoff, ordered by ready time.

use super::collector::PendingOperation;
use crate::error_code::FaultCode;
use crate::operation::Operation;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Inspection view of one scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    pub ready_at: Instant,
    pub retries_remaining: u32,
    pub attempts: u32,
    pub group: Option<String>,
    /// Code of the fault that caused the retry.
    pub last_fault: Option<FaultCode>,
}

/// Time-ordered retry set. Ties keep insertion order.
pub(crate) struct RetryScheduler<O> {
    entries: BTreeMap<(Instant, u64), PendingOperation<O>>,
    seq: u64,
}

impl<O: Operation> RetryScheduler<O> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Park `item` until `ready_at`.
    pub fn schedule(&mut self, mut item: PendingOperation<O>, ready_at: Instant) {
        item.next_retry_at = Some(ready_at);
        self.seq = self.seq.wrapping_add(1);
        self.entries.insert((ready_at, self.seq), item);
    }

    /// Remove and return every item whose ready time is `<= now`.
    pub fn take_ready(&mut self, now: Instant) -> Vec<PendingOperation<O>> {
        let later = self.entries.split_off(&(now, u64::MAX));
        let ready = std::mem::replace(&mut self.entries, later);
        ready
            .into_values()
            .map(|mut item| {
                item.next_retry_at = None;
                item
            })
            .collect()
    }

    /// Earliest ready time, if anything is scheduled.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Drop everything, returning how many operations were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<RetryEntry> {
        self.entries
            .iter()
            .map(|((at, _), item)| RetryEntry {
                ready_at: item.next_retry_at.unwrap_or(*at),
                retries_remaining: item.retries_remaining,
                attempts: item.attempts,
                group: item.group().map(str::to_owned),
                last_fault: item.last_fault.as_ref().map(|f| f.code),
            })
            .collect()
    }
}
