//! Operation contexts: the unit of work the engine batches, retries and reports.
//!
//! The engine is generic over [`Operation`], so generic requests, deletes and
//! multi-step upserts all share one batching/retry control flow. Retry state
//! (remaining budget, next attempt time, first unhandled fault) is kept by the
//! engine alongside each operation and never leaks into implementations.
//!
//! [`OperationContext`] is a closure-based implementation covering the common
//! cases:
//!
//! ```rust
//! use bulk_dispatch::{FaultCode, OperationContext};
//!
//! // Delete-if-exists: a not-found fault counts as success.
//! let op: OperationContext<String, (), u32> =
//!     OperationContext::delete(42, "DELETE accounts(42)".to_string())
//!         .ignore_missing()
//!         .with_group("svc-importer");
//! assert_eq!(op.len(), 1);
//! ```

use crate::error_code::FaultCode;
use crate::fault::Fault;
use serde::{Deserialize, Serialize};

/// One logical operation submitted through the engine.
///
/// An operation expands to one or more wire requests. They travel together in the
/// same physical batch and are always resubmitted together on retry.
pub trait Operation: Send + 'static {
    type Request: Clone + Send + Sync + 'static;
    type Response: Send + 'static;
    /// Caller-supplied value handed back with terminal errors.
    type Token: Send + 'static;

    /// Wire requests, in submission order. Must not be empty.
    fn requests(&self) -> &[Self::Request];

    /// Partition key; operations with different keys never share a batch.
    fn group_key(&self) -> Option<&str> {
        None
    }

    /// Short label used in logs.
    fn kind(&self) -> &'static str {
        "request"
    }

    /// Called with the response for wire request `index`.
    ///
    /// A retried operation resubmits every request, so this can run more than once
    /// for the same index: once per attempt in which that request succeeded.
    fn on_success(&mut self, index: usize, response: Self::Response) {
        let _ = (index, response);
    }

    /// Called for a non-throttling fault on wire request `index`.
    ///
    /// Returning `true` marks the fault as handled: the request counts as complete
    /// and nothing is retried or reported for it.
    fn on_fault(&mut self, index: usize, fault: &Fault) -> bool {
        let _ = (index, fault);
        false
    }

    /// Consume the operation, yielding its correlation token.
    fn into_token(self) -> Self::Token;
}

/// Terminal error report for an operation whose retry budget ran out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailure {
    /// First unhandled fault of the final attempt.
    pub fault: Fault,
    /// Number of times the operation was submitted.
    pub attempts: u32,
    /// Further unhandled faults of the final attempt that were not reported.
    pub suppressed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Request,
    Delete,
    Upsert,
}

type SuccessFn<R> = Box<dyn FnMut(R) + Send>;
type FaultFn = Box<dyn FnMut(usize, &Fault) -> bool + Send>;

/// Closure-backed [`Operation`].
pub struct OperationContext<Req, Resp, T> {
    token: T,
    requests: Vec<Req>,
    group: Option<String>,
    kind: OperationKind,
    ignore_missing: bool,
    on_success: Vec<Option<SuccessFn<Resp>>>,
    on_fault: Option<FaultFn>,
}

impl<Req, Resp, T> OperationContext<Req, Resp, T> {
    fn with_kind(token: T, requests: Vec<Req>, kind: OperationKind) -> Self {
        let on_success = requests.iter().map(|_| None).collect();
        Self {
            token,
            requests,
            group: None,
            kind,
            ignore_missing: false,
            on_success,
            on_fault: None,
        }
    }

    /// A generic single-request operation.
    pub fn request(token: T, request: Req) -> Self {
        Self::with_kind(token, vec![request], OperationKind::Request)
    }

    /// A delete. Combine with [`ignore_missing`](Self::ignore_missing) for
    /// delete-if-exists semantics.
    pub fn delete(token: T, request: Req) -> Self {
        Self::with_kind(token, vec![request], OperationKind::Delete)
    }

    /// A create-or-update that may expand to several steps (e.g. the create plus
    /// its association requests).
    pub fn upsert(token: T, steps: Vec<Req>) -> Self {
        Self::with_kind(token, steps, OperationKind::Upsert)
    }

    pub fn with_group(mut self, key: impl Into<String>) -> Self {
        self.group = Some(key.into());
        self
    }

    /// Treat a not-found fault as success.
    pub fn ignore_missing(mut self) -> Self {
        self.ignore_missing = true;
        self
    }

    /// Callback for the response of the first (or only) request.
    pub fn with_success<F>(self, f: F) -> Self
    where
        F: FnMut(Resp) + Send + 'static,
    {
        self.with_step_success(0, f)
    }

    /// Callback for the response of request `index`. Out-of-range indices are ignored.
    pub fn with_step_success<F>(mut self, index: usize, f: F) -> Self
    where
        F: FnMut(Resp) + Send + 'static,
    {
        if let Some(slot) = self.on_success.get_mut(index) {
            *slot = Some(Box::new(f));
        }
        self
    }

    /// Fault interception hook, consulted after [`ignore_missing`](Self::ignore_missing).
    pub fn with_fault_handler<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, &Fault) -> bool + Send + 'static,
    {
        self.on_fault = Some(Box::new(f));
        self
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl<Req, Resp, T> Operation for OperationContext<Req, Resp, T>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    type Request = Req;
    type Response = Resp;
    type Token = T;

    fn requests(&self) -> &[Req] {
        &self.requests
    }

    fn group_key(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn kind(&self) -> &'static str {
        match self.kind {
            OperationKind::Request => "request",
            OperationKind::Delete => "delete",
            OperationKind::Upsert => "upsert",
        }
    }

    fn on_success(&mut self, index: usize, response: Resp) {
        if let Some(Some(cb)) = self.on_success.get_mut(index) {
            cb(response);
        }
    }

    fn on_fault(&mut self, index: usize, fault: &Fault) -> bool {
        if self.ignore_missing && fault.code == FaultCode::NotFound {
            return true;
        }
        match self.on_fault.as_mut() {
            Some(handler) => handler(index, fault),
            None => false,
        }
    }

    fn into_token(self) -> T {
        self.token
    }
}
