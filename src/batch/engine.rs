//! The dispatch engine: enqueue, flush, drain.

use super::collector::{BatchCollector, PendingBatch, PendingOperation};
use super::executor::{BatchExecutor, BatchGate, BatchReport};
use super::retry::{RetryEntry, RetryScheduler};
use crate::config::EngineConfig;
use crate::operation::{Operation, OperationFailure};
use crate::resilience::throttling::{DefaultThrottlingClassifier, ThrottlingClassifier};
use crate::stats::EngineStats;
use crate::transport::BatchTransport;
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receives terminal errors together with the operation's correlation token.
pub trait FailureSink<T>: Send {
    fn report(&mut self, token: T, failure: OperationFailure);
}

impl<T, F> FailureSink<T> for F
where
    F: FnMut(T, OperationFailure) + Send,
{
    fn report(&mut self, token: T, failure: OperationFailure) {
        self(token, failure)
    }
}

/// How a [`BatchEngine::drain`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing pending, nothing left to retry.
    Completed,
    /// The stop signal fired; `discarded` operations were dropped unreported.
    Cancelled { discarded: usize },
}

pub(crate) enum DrainStep {
    Finished,
    Cancelled { discarded: usize },
    WaitUntil(Instant),
}

pub struct BatchEngineBuilder<O: Operation> {
    transport: Arc<dyn BatchTransport<O::Request, O::Response>>,
    config: EngineConfig,
    classifier: Option<Arc<dyn ThrottlingClassifier>>,
    gate: Option<Arc<dyn BatchGate<O::Request>>>,
    on_error: Option<Box<dyn FailureSink<O::Token>>>,
    cancel: Option<CancellationToken>,
}

impl<O: Operation> BatchEngineBuilder<O> {
    pub fn new(transport: Arc<dyn BatchTransport<O::Request, O::Response>>) -> Self {
        Self {
            transport,
            config: EngineConfig::default(),
            classifier: None,
            gate: None,
            on_error: None,
            cancel: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default code-based throttling classifier.
    pub fn classifier(mut self, classifier: Arc<dyn ThrottlingClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn BatchGate<O::Request>>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn on_error<S>(mut self, sink: S) -> Self
    where
        S: FailureSink<O::Token> + 'static,
    {
        self.on_error = Some(Box::new(sink));
        self
    }

    /// Use an externally owned stop signal.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<BatchEngine<O>> {
        self.config.validate()?;
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(DefaultThrottlingClassifier::new(self.config.throttling()))
        });
        let executor = BatchExecutor::new(
            self.transport,
            classifier,
            self.gate,
            self.config.retry_delay(),
            self.config.bypass_automation.clone(),
        );
        Ok(BatchEngine {
            collector: BatchCollector::new(self.config.batch_size),
            retries: RetryScheduler::new(),
            executor,
            on_error: self.on_error,
            cancel: self.cancel.unwrap_or_default(),
            rescheduled: Arc::new(Notify::new()),
            discarded: 0,
            stats: EngineStats::default(),
            config: self.config,
        })
    }
}

/// Batches operations, submits them, and retries what failed transiently.
///
/// `BatchEngine` has a single owner: every method takes `&mut self`, so one
/// control flow drives enqueueing, submission and retries, and at most one batch
/// is in flight. Use [`SharedBatchEngine`] when several tasks produce work.
///
/// Typical use: [`enqueue`](Self::enqueue) every operation, [`flush`](Self::flush)
/// once input ends, then [`drain`](Self::drain) until the retry queue is empty.
pub struct BatchEngine<O: Operation> {
    config: EngineConfig,
    collector: BatchCollector<O>,
    executor: BatchExecutor<O>,
    retries: RetryScheduler<O>,
    on_error: Option<Box<dyn FailureSink<O::Token>>>,
    cancel: CancellationToken,
    /// Signalled when a retry lands ahead of the earliest one already waiting.
    rescheduled: Arc<Notify>,
    /// Operations dropped since the last cancelled drain reported them.
    discarded: usize,
    stats: EngineStats,
}

impl<O: Operation> BatchEngine<O> {
    pub fn builder(
        transport: Arc<dyn BatchTransport<O::Request, O::Response>>,
    ) -> BatchEngineBuilder<O> {
        BatchEngineBuilder::new(transport)
    }

    /// Queue an operation. Submits a batch as soon as one fills up.
    ///
    /// Fails only for operations the engine can never submit: no requests, or more
    /// requests than fit in one batch. After cancellation operations are accepted
    /// and dropped.
    pub async fn enqueue(&mut self, op: O) -> Result<()> {
        let count = op.requests().len();
        if count == 0 || count > self.config.batch_size {
            return Err(Error::validation_with_context(
                "operation does not fit in a batch",
                ErrorContext::new()
                    .with_field_path("operation.requests")
                    .with_details(format!(
                        "{} requests, batch size {}",
                        count, self.config.batch_size
                    ))
                    .with_source("batch_engine"),
            ));
        }
        self.stats.operations_enqueued += 1;
        if self.cancel.is_cancelled() {
            self.record_discarded(1);
            debug!(kind = op.kind(), "engine cancelled; operation dropped");
            return Ok(());
        }
        self.admit(PendingOperation::new(op, self.config.max_retries))
            .await;
        Ok(())
    }

    /// Submit whatever is pending, full or not.
    pub async fn flush(&mut self) {
        if let Some(batch) = self.collector.drain() {
            self.submit(batch).await;
        }
    }

    /// Run the retry queue until it is empty or the stop signal fires.
    ///
    /// Anything still pending is flushed first. Ready retries are re-batched and the
    /// partial batches they leave are flushed. While nothing is ready the engine
    /// sleeps until the earliest ready time, waking immediately on cancellation.
    pub async fn drain(&mut self) -> DrainOutcome {
        loop {
            match self.drain_step().await {
                DrainStep::Finished => return DrainOutcome::Completed,
                DrainStep::Cancelled { discarded } => {
                    return DrainOutcome::Cancelled { discarded }
                }
                DrainStep::WaitUntil(at) => {
                    wait_until(&self.cancel, &self.rescheduled, at).await
                }
            }
        }
    }

    /// Promote and submit everything that is ready, then report what to do next.
    pub(crate) async fn drain_step(&mut self) -> DrainStep {
        loop {
            if self.cancel.is_cancelled() {
                self.discard_all();
                return DrainStep::Cancelled {
                    discarded: std::mem::take(&mut self.discarded),
                };
            }
            self.flush().await;
            let ready = self.retries.take_ready(Instant::now());
            if ready.is_empty() {
                break;
            }
            debug!(count = ready.len(), "promoting ready retries");
            for item in ready {
                self.admit(item).await;
            }
        }
        match self.retries.next_ready_at() {
            Some(at) => DrainStep::WaitUntil(at),
            None => DrainStep::Finished,
        }
    }

    /// Fire the stop signal. An in-flight call still completes normally.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn retry_snapshot(&self) -> Vec<RetryEntry> {
        self.retries.snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.collector.len()
    }

    pub fn retry_len(&self) -> usize {
        self.retries.len()
    }

    pub fn is_idle(&self) -> bool {
        self.collector.is_empty() && self.retries.is_empty()
    }

    /// Wrap the engine for use from several tasks.
    pub fn into_shared(self) -> SharedBatchEngine<O> {
        SharedBatchEngine::new(self)
    }

    async fn admit(&mut self, item: PendingOperation<O>) {
        for batch in self.collector.add(item) {
            self.submit(batch).await;
        }
    }

    async fn submit(&mut self, batch: PendingBatch<O>) {
        if self.cancel.is_cancelled() {
            let dropped = batch.len();
            self.record_discarded(dropped);
            debug!(operations = dropped, "engine cancelled; batch dropped");
            return;
        }
        let requests = batch.request_count() as u64;
        let report = self.executor.execute(batch).await;
        if report.vetoed > 0 {
            self.stats.batches_vetoed += 1;
        } else {
            self.stats.batches_submitted += 1;
            self.stats.requests_submitted += requests;
        }
        self.apply(report);
    }

    fn apply(&mut self, report: BatchReport<O>) {
        let stats = &mut self.stats;
        stats.operations_completed += report.completed as u64;
        stats.operations_vetoed += report.vetoed as u64;
        stats.operations_throttled += report.throttled as u64;
        stats.operations_retried += (report.retries.len() - report.throttled) as u64;
        stats.operations_errored += report.errors.len() as u64;
        if report.transport_failure {
            stats.batch_failures += 1;
        }

        let earliest = self.retries.next_ready_at();
        for (item, ready_at) in report.retries {
            if earliest.map_or(true, |at| ready_at < at) {
                self.rescheduled.notify_one();
            }
            self.retries.schedule(item, ready_at);
        }
        for (token, failure) in report.errors {
            if let Some(sink) = self.on_error.as_mut() {
                sink.report(token, failure);
            }
        }
    }

    fn discard_all(&mut self) {
        let discarded = self.collector.clear() + self.retries.clear();
        if discarded > 0 {
            info!(discarded, "engine cancelled; dropping queued operations");
        }
        self.record_discarded(discarded);
    }

    fn record_discarded(&mut self, count: usize) {
        self.discarded += count;
        self.stats.operations_discarded += count as u64;
    }
}

/// Sleep until `at`, the stop signal, or an earlier retry being scheduled.
async fn wait_until(cancel: &CancellationToken, rescheduled: &Notify, at: Instant) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = rescheduled.notified() => {}
        _ = tokio::time::sleep_until(at) => {}
    }
}

/// A [`BatchEngine`] behind an async mutex, for multiple producers.
///
/// Every call takes the lock for its whole duration, including the remote call, so
/// batches stay strictly sequential. [`drain`](Self::drain) releases the lock while
/// it sleeps, letting producers keep enqueueing; a retry they schedule ahead of the
/// current wake-up time wakes it early.
pub struct SharedBatchEngine<O: Operation> {
    inner: Arc<Mutex<BatchEngine<O>>>,
    cancel: CancellationToken,
    rescheduled: Arc<Notify>,
}

impl<O: Operation> Clone for SharedBatchEngine<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: self.cancel.clone(),
            rescheduled: Arc::clone(&self.rescheduled),
        }
    }
}

impl<O: Operation> SharedBatchEngine<O> {
    pub fn new(engine: BatchEngine<O>) -> Self {
        let cancel = engine.cancellation_token();
        let rescheduled = Arc::clone(&engine.rescheduled);
        Self {
            inner: Arc::new(Mutex::new(engine)),
            cancel,
            rescheduled,
        }
    }

    pub async fn enqueue(&self, op: O) -> Result<()> {
        self.inner.lock().await.enqueue(op).await
    }

    pub async fn flush(&self) {
        self.inner.lock().await.flush().await
    }

    pub async fn drain(&self) -> DrainOutcome {
        loop {
            let step = self.inner.lock().await.drain_step().await;
            match step {
                DrainStep::Finished => return DrainOutcome::Completed,
                DrainStep::Cancelled { discarded } => {
                    return DrainOutcome::Cancelled { discarded }
                }
                DrainStep::WaitUntil(at) => {
                    wait_until(&self.cancel, &self.rescheduled, at).await
                }
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn stats(&self) -> EngineStats {
        self.inner.lock().await.stats()
    }

    pub async fn is_idle(&self) -> bool {
        self.inner.lock().await.is_idle()
    }
}
