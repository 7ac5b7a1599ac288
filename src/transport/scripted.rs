//! In-memory transport for tests and dry runs.

use super::{BatchTransport, ExecutionContext};
use crate::fault::{Fault, Outcome};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder<Req, Resp> =
    Box<dyn FnMut(&[Req], &ExecutionContext) -> std::result::Result<Vec<Outcome<Resp>>, Fault> + Send>;

/// One call observed by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedBatch<Req> {
    pub requests: Vec<Req>,
    pub context: ExecutionContext,
}

/// Transport whose replies come from a caller-supplied closure.
///
/// Every call is recorded so tests can assert on batch composition and the
/// execution context each batch ran with. An optional latency simulates a slow
/// remote call (it honours tokio's paused clock).
pub struct ScriptedTransport<Req, Resp> {
    responder: Mutex<Responder<Req, Resp>>,
    calls: Arc<Mutex<Vec<RecordedBatch<Req>>>>,
    latency: Option<Duration>,
}

impl<Req, Resp> ScriptedTransport<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[Req], &ExecutionContext) -> std::result::Result<Vec<Outcome<Resp>>, Fault>
            + Send
            + 'static,
    {
        Self {
            responder: Mutex::new(Box::new(responder)),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: None,
        }
    }

    /// A transport that answers every request with `f(request)`.
    pub fn per_item<F>(mut f: F) -> Self
    where
        F: FnMut(&Req) -> Outcome<Resp> + Send + 'static,
    {
        Self::new(move |reqs, _| Ok(reqs.iter().map(&mut f).collect()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<RecordedBatch<Req>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Request lists of every call, in call order.
    pub fn batches(&self) -> Vec<Vec<Req>> {
        self.calls().into_iter().map(|c| c.requests).collect()
    }
}

#[async_trait]
impl<Req, Resp> BatchTransport<Req, Resp> for ScriptedTransport<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn execute(
        &self,
        requests: &[Req],
        ctx: &ExecutionContext,
    ) -> std::result::Result<Vec<Outcome<Resp>>, Fault> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedBatch {
                requests: requests.to_vec(),
                context: ctx.clone(),
            });
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut responder = self
            .responder
            .lock()
            .map_err(|_| Fault::new(crate::FaultCode::Unknown, "scripted transport poisoned"))?;
        (*responder)(requests, ctx)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
