//! Batch executor: submits one physical batch and routes every outcome.

use super::collector::{PendingBatch, PendingOperation};
use crate::error_code::FaultCode;
use crate::fault::{Fault, Outcome};
use crate::operation::{Operation, OperationFailure};
use crate::resilience::throttling::{Throttling, ThrottlingClassifier};
use crate::transport::{BatchTransport, ExecutionContext};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a [`BatchGate`] sees before a batch is sent.
#[derive(Debug)]
pub struct BatchPreview<'a, Req> {
    pub group: Option<&'a str>,
    pub requests: &'a [Req],
    pub operations: usize,
}

/// Pre-submission hook, consulted once per physical batch.
///
/// Returning `false` vetoes the batch: its operations are dropped without being
/// attempted, retried or reported as errors.
#[async_trait]
pub trait BatchGate<Req>: Send + Sync
where
    Req: Send + Sync + 'static,
{
    async fn confirm(&self, preview: &BatchPreview<'_, Req>) -> bool;
}

/// Adapts a synchronous closure into a [`BatchGate`].
pub struct FnGate<F> {
    func: F,
}

impl<F> FnGate<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<Req, F> BatchGate<Req> for FnGate<F>
where
    Req: Send + Sync + 'static,
    F: Fn(&BatchPreview<'_, Req>) -> bool + Send + Sync,
{
    async fn confirm(&self, preview: &BatchPreview<'_, Req>) -> bool {
        (self.func)(preview)
    }
}

/// Everything the engine has to apply after a batch ran.
pub(crate) struct BatchReport<O: Operation> {
    pub completed: usize,
    pub vetoed: usize,
    pub throttled: usize,
    pub transport_failure: bool,
    /// Operations to park in the retry scheduler, with their ready time.
    pub retries: Vec<(PendingOperation<O>, Instant)>,
    pub errors: Vec<(O::Token, OperationFailure)>,
}

impl<O: Operation> BatchReport<O> {
    fn new() -> Self {
        Self {
            completed: 0,
            vetoed: 0,
            throttled: 0,
            transport_failure: false,
            retries: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Per-operation result of walking its outcomes.
struct Verdict {
    throttle: Option<Duration>,
    first_fault: Option<Fault>,
    suppressed: usize,
}

pub(crate) struct BatchExecutor<O: Operation> {
    transport: Arc<dyn BatchTransport<O::Request, O::Response>>,
    classifier: Arc<dyn ThrottlingClassifier>,
    gate: Option<Arc<dyn BatchGate<O::Request>>>,
    retry_delay: Duration,
    bypass_automation: Vec<String>,
    _op: PhantomData<fn() -> O>,
}

impl<O: Operation> BatchExecutor<O> {
    pub fn new(
        transport: Arc<dyn BatchTransport<O::Request, O::Response>>,
        classifier: Arc<dyn ThrottlingClassifier>,
        gate: Option<Arc<dyn BatchGate<O::Request>>>,
        retry_delay: Duration,
        bypass_automation: Vec<String>,
    ) -> Self {
        Self {
            transport,
            classifier,
            gate,
            retry_delay,
            bypass_automation,
            _op: PhantomData,
        }
    }

    /// Submit `batch` and decide the fate of each of its operations.
    pub async fn execute(&self, batch: PendingBatch<O>) -> BatchReport<O> {
        let mut report = BatchReport::new();
        let PendingBatch { group, mut operations } = batch;

        let requests: Vec<O::Request> = operations
            .iter()
            .flat_map(|p| p.op.requests().iter().cloned())
            .collect();

        if let Some(gate) = &self.gate {
            let preview = BatchPreview {
                group: group.as_deref(),
                requests: &requests,
                operations: operations.len(),
            };
            if !gate.confirm(&preview).await {
                info!(
                    group = group.as_deref().unwrap_or("default"),
                    operations = operations.len(),
                    "batch vetoed before submission"
                );
                report.vetoed = operations.len();
                return report;
            }
        }

        let ctx = ExecutionContext::new(group, self.bypass_automation.clone());
        for p in operations.iter_mut() {
            p.attempts = p.attempts.saturating_add(1);
        }

        let start = Instant::now();
        let result = self.transport.execute(&requests, &ctx).await;
        let now = Instant::now();

        info!(
            batch_id = %ctx.batch_id,
            group = ctx.run_as.as_deref().unwrap_or("default"),
            transport = self.transport.name(),
            operations = operations.len(),
            requests = requests.len(),
            ok = result.is_ok(),
            duration_ms = now.duration_since(start).as_millis(),
            "batch submitted"
        );

        match result {
            Ok(outcomes) if outcomes.len() == requests.len() => {
                self.route(operations, outcomes, now, &mut report);
            }
            Ok(outcomes) => {
                let fault = Fault::new(
                    FaultCode::InvalidResponse,
                    format!(
                        "service returned {} outcomes for {} requests",
                        outcomes.len(),
                        requests.len()
                    ),
                );
                self.fail_all(operations, fault, now, &mut report);
            }
            Err(fault) => self.fail_all(operations, fault, now, &mut report),
        }
        report
    }

    /// The call failed as a whole: no per-item results exist.
    fn fail_all(
        &self,
        operations: Vec<PendingOperation<O>>,
        fault: Fault,
        now: Instant,
        report: &mut BatchReport<O>,
    ) {
        report.transport_failure = true;
        match self.classifier.classify(&fault) {
            Throttling::Throttled { retry_after } => {
                warn!(
                    operations = operations.len(),
                    retry_after_ms = retry_after.as_millis(),
                    fault_code = fault.code.code(),
                    "batch throttled; rescheduling every operation"
                );
                for mut p in operations {
                    p.last_fault = Some(fault.clone());
                    report.throttled += 1;
                    report.retries.push((p, now + retry_after));
                }
            }
            Throttling::NotThrottled => {
                warn!(
                    operations = operations.len(),
                    fault_code = fault.code.code(),
                    error = %fault,
                    "batch call failed"
                );
                for p in operations {
                    self.retry_or_fail(p, fault.clone(), 0, now, report);
                }
            }
        }
    }

    /// Walk outcomes in flat order, handing each to the operation that owns it.
    fn route(
        &self,
        operations: Vec<PendingOperation<O>>,
        outcomes: Vec<Outcome<O::Response>>,
        now: Instant,
        report: &mut BatchReport<O>,
    ) {
        let mut outcomes = outcomes.into_iter();
        for mut p in operations {
            let count = p.request_count();
            let verdict = self.walk(&mut p.op, outcomes.by_ref().take(count));

            if let Some(delay) = verdict.throttle {
                debug!(
                    kind = p.op.kind(),
                    retry_after_ms = delay.as_millis(),
                    "operation throttled"
                );
                report.throttled += 1;
                report.retries.push((p, now + delay));
            } else if let Some(fault) = verdict.first_fault {
                self.retry_or_fail(p, fault, verdict.suppressed, now, report);
            } else {
                report.completed += 1;
            }
        }
    }

    fn walk(
        &self,
        op: &mut O,
        outcomes: impl Iterator<Item = Outcome<O::Response>>,
    ) -> Verdict {
        let mut verdict = Verdict {
            throttle: None,
            first_fault: None,
            suppressed: 0,
        };
        for (index, outcome) in outcomes.enumerate() {
            match outcome {
                Ok(response) => op.on_success(index, response),
                Err(fault) => match self.classifier.classify(&fault) {
                    Throttling::Throttled { retry_after } => {
                        verdict.throttle =
                            Some(verdict.throttle.map_or(retry_after, |d| d.max(retry_after)));
                    }
                    Throttling::NotThrottled => {
                        if op.on_fault(index, &fault) {
                            debug!(
                                kind = op.kind(),
                                index,
                                fault_code = fault.code.code(),
                                "fault handled by operation"
                            );
                        } else if verdict.first_fault.is_none() {
                            verdict.first_fault = Some(fault);
                        } else {
                            verdict.suppressed += 1;
                        }
                    }
                },
            }
        }
        verdict
    }

    fn retry_or_fail(
        &self,
        mut p: PendingOperation<O>,
        fault: Fault,
        suppressed: usize,
        now: Instant,
        report: &mut BatchReport<O>,
    ) {
        if p.retries_remaining > 0 {
            p.retries_remaining -= 1;
            debug!(
                kind = p.op.kind(),
                retries_remaining = p.retries_remaining,
                fault_code = fault.code.code(),
                "scheduling retry"
            );
            p.last_fault = Some(fault);
            report.retries.push((p, now + self.retry_delay));
        } else {
            warn!(
                kind = p.op.kind(),
                attempts = p.attempts,
                fault_code = fault.code.code(),
                error = %fault,
                "operation failed; retries exhausted"
            );
            let failure = OperationFailure {
                fault,
                attempts: p.attempts,
                suppressed,
            };
            report.errors.push((p.op.into_token(), failure));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationContext;
    use crate::resilience::throttling::DefaultThrottlingClassifier;
    use crate::transport::ScriptedTransport;
    use std::sync::Mutex;

    type Op = OperationContext<u32, u32, u32>;

    fn executor(transport: ScriptedTransport<u32, u32>) -> BatchExecutor<Op> {
        BatchExecutor::new(
            Arc::new(transport),
            Arc::new(DefaultThrottlingClassifier::default()),
            None,
            Duration::from_secs(1),
            vec!["plugins".into()],
        )
    }

    fn batch(ops: Vec<Op>, retries: u32) -> PendingBatch<Op> {
        PendingBatch {
            group: None,
            operations: ops
                .into_iter()
                .map(|op| PendingOperation::new(op, retries))
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn continue_on_error_isolates_the_faulting_item() {
        let successes = Arc::new(Mutex::new(Vec::new()));
        let ops = (1..=3)
            .map(|id| {
                let s = Arc::clone(&successes);
                OperationContext::request(id, id).with_success(move |r| s.lock().unwrap().push(r))
            })
            .collect();
        let exec = executor(ScriptedTransport::per_item(|r| {
            if *r == 2 {
                Err(Fault::new(FaultCode::ServerError, "boom"))
            } else {
                Ok(r + 100)
            }
        }));

        let report = exec.execute(batch(ops, 1)).await;
        assert_eq!(*successes.lock().unwrap(), vec![101, 103]);
        assert_eq!(report.completed, 2);
        assert_eq!(report.retries.len(), 1);
        assert_eq!(report.retries[0].0.retries_remaining, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_unhandled_fault_wins() {
        let op: Op = OperationContext::upsert(7, vec![1, 2, 3]);
        let exec = executor(ScriptedTransport::per_item(|r| {
            Err(Fault::new(FaultCode::InvalidRequest, format!("bad step {r}")))
        }));

        let report = exec.execute(batch(vec![op], 0)).await;
        assert_eq!(report.errors.len(), 1);
        let (token, failure) = &report.errors[0];
        assert_eq!(*token, 7);
        assert_eq!(failure.fault.message, "bad step 1");
        assert_eq!(failure.suppressed, 2);
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_sub_request_reschedules_whole_operation() {
        let op: Op = OperationContext::upsert(1, vec![10, 11]);
        let exec = executor(ScriptedTransport::per_item(|r| {
            if *r == 11 {
                Err(Fault::throttled(Duration::from_secs(4)))
            } else {
                Ok(*r)
            }
        }));

        let start = Instant::now();
        let report = exec.execute(batch(vec![op], 2)).await;
        assert_eq!(report.throttled, 1);
        assert_eq!(report.retries.len(), 1);
        let (p, at) = &report.retries[0];
        assert_eq!(p.retries_remaining, 2);
        assert_eq!(*at, start + Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_outcome_count_is_a_call_failure() {
        let exec = executor(ScriptedTransport::new(|_, _| Ok(vec![Ok(1)])));
        let ops = vec![OperationContext::request(1, 1), OperationContext::request(2, 2)];
        let report = exec.execute(batch(ops, 0)).await;
        assert!(report.transport_failure);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].1.fault.code, FaultCode::InvalidResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn veto_drops_batch_without_calling_transport() {
        let transport: Arc<ScriptedTransport<u32, u32>> =
            Arc::new(ScriptedTransport::per_item(|r: &u32| Ok(*r)));
        let exec: BatchExecutor<Op> = BatchExecutor::new(
            transport.clone(),
            Arc::new(DefaultThrottlingClassifier::default()),
            Some(Arc::new(FnGate::new(|p: &BatchPreview<'_, u32>| p.requests.len() < 2))),
            Duration::from_secs(1),
            Vec::new(),
        );
        let ops = vec![OperationContext::request(1, 1), OperationContext::request(2, 2)];
        let report = exec.execute(batch(ops, 3)).await;
        assert_eq!(report.vetoed, 2);
        assert!(report.retries.is_empty() && report.errors.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn execution_context_carries_group_and_bypass_list() {
        let transport: Arc<ScriptedTransport<u32, u32>> =
            Arc::new(ScriptedTransport::per_item(|r: &u32| Ok(*r)));
        let exec: BatchExecutor<Op> = BatchExecutor::new(
            transport.clone(),
            Arc::new(DefaultThrottlingClassifier::default()),
            None,
            Duration::from_secs(1),
            vec!["plugins".into(), "workflows".into()],
        );
        let mut b = batch(vec![OperationContext::request(1, 1).with_group("user-a")], 0);
        b.group = Some("user-a".into());
        exec.execute(b).await;

        let calls = transport.calls();
        assert_eq!(calls[0].context.run_as.as_deref(), Some("user-a"));
        assert_eq!(calls[0].context.bypass_automation, vec!["plugins", "workflows"]);
    }
}
