//! Retry budgets, throttling, cancellation and concurrent producers.

use async_trait::async_trait;
use bulk_dispatch::{
    BatchEngine, BatchTransport, DrainOutcome, EngineConfig, ExecutionContext, Fault, FaultCode,
    OperationContext, OperationFailure, Outcome, ScriptedTransport,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type Op = OperationContext<u32, (), u32>;

fn failures() -> (
    Arc<Mutex<Vec<(u32, OperationFailure)>>>,
    impl FnMut(u32, OperationFailure) + Send + 'static,
) {
    let store = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&store);
    (store, move |token: u32, failure: OperationFailure| {
        sink.lock().unwrap().push((token, failure))
    })
}

#[tokio::test(start_paused = true)]
async fn transient_faults_consume_exactly_the_budget() {
    let transport: Arc<ScriptedTransport<u32, ()>> =
        Arc::new(ScriptedTransport::per_item(|_: &u32| {
            Err(Fault::new(FaultCode::ServiceUnavailable, "try later"))
        }));
    let (errors, sink) = failures();
    let mut engine = BatchEngine::<Op>::builder(transport.clone())
        .config(EngineConfig::new().with_max_retries(3))
        .on_error(sink)
        .build()
        .unwrap();

    let start = Instant::now();
    engine.enqueue(Op::request(9, 9)).await.unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Completed);

    assert_eq!(transport.call_count(), 4);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 9);
    assert_eq!(errors[0].1.attempts, 4);
    assert_eq!(errors[0].1.fault.code, FaultCode::ServiceUnavailable);
    // Three fixed one-second backoffs.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(engine.stats().operations_retried, 3);
}

#[tokio::test(start_paused = true)]
async fn throttled_batch_reschedules_everything_with_budget_intact() {
    let transport: Arc<ScriptedTransport<u32, ()>> = Arc::new(ScriptedTransport::new(
        |_: &[u32], _: &ExecutionContext| Err(Fault::throttled(Duration::from_secs(2))),
    ));
    let (errors, sink) = failures();
    let mut engine = BatchEngine::<Op>::builder(transport)
        .config(EngineConfig::new().with_batch_size(5).with_max_retries(3))
        .on_error(sink)
        .build()
        .unwrap();

    let start = Instant::now();
    for id in 0..5 {
        engine.enqueue(Op::request(id, id)).await.unwrap();
    }

    let snapshot = engine.retry_snapshot();
    assert_eq!(snapshot.len(), 5);
    for entry in &snapshot {
        assert_eq!(entry.ready_at, start + Duration::from_secs(2));
        assert_eq!(entry.retries_remaining, 3);
        assert_eq!(entry.last_fault, Some(FaultCode::Throttled));
    }
    assert!(errors.lock().unwrap().is_empty());
    let stats = engine.stats();
    assert_eq!(stats.operations_throttled, 5);
    assert_eq!(stats.batch_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn throttling_retries_until_success_without_spending_budget() {
    let mut calls = 0u32;
    let transport: Arc<ScriptedTransport<u32, ()>> =
        Arc::new(ScriptedTransport::per_item(move |_: &u32| {
            calls += 1;
            if calls <= 20 {
                Err(Fault::from_service("0x80072322", "request limit exceeded")
                    .with_retry_after(Duration::from_secs(30)))
            } else {
                Ok(())
            }
        }));
    let (errors, sink) = failures();
    let done = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&done);
    let mut engine = BatchEngine::<Op>::builder(transport.clone())
        .config(EngineConfig::new().with_max_retries(1))
        .on_error(sink)
        .build()
        .unwrap();

    engine
        .enqueue(Op::request(1, 1).with_success(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Completed);

    assert_eq!(transport.call_count(), 21);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn endless_throttling_ends_only_by_cancellation() {
    let transport: Arc<ScriptedTransport<u32, ()>> =
        Arc::new(ScriptedTransport::per_item(|_: &u32| {
            Err(Fault::throttled(Duration::from_secs(10)))
        }));
    let (errors, sink) = failures();
    let mut engine = BatchEngine::<Op>::builder(transport.clone())
        .config(EngineConfig::new().with_max_retries(0))
        .on_error(sink)
        .build()
        .unwrap();

    engine.enqueue(Op::request(1, 1)).await.unwrap();
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(305)).await;
        token.cancel();
    });

    assert_eq!(
        engine.drain().await,
        DrainOutcome::Cancelled { discarded: 1 }
    );
    assert_eq!(transport.call_count(), 31);
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(engine.stats().operations_discarded, 1);
    assert!(engine.is_idle());
}

#[tokio::test(start_paused = true)]
async fn cancellation_drops_queued_and_scheduled_work_silently() {
    let transport: Arc<ScriptedTransport<u32, ()>> =
        Arc::new(ScriptedTransport::per_item(|r: &u32| {
            if r % 2 == 0 {
                Err(Fault::new(FaultCode::Timeout, "slow"))
            } else {
                Ok(())
            }
        }));
    let (errors, sink) = failures();
    let completed = Arc::new(AtomicUsize::new(0));
    let mut engine = BatchEngine::<Op>::builder(transport.clone())
        .config(
            EngineConfig::new()
                .with_batch_size(4)
                .with_retry_delay(Duration::from_secs(60)),
        )
        .on_error(sink)
        .build()
        .unwrap();

    for id in 0..6 {
        let c = Arc::clone(&completed);
        engine
            .enqueue(Op::request(id, id).with_success(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
    }
    // One full batch went out: 0 and 2 are waiting to retry, 4 and 5 are pending.
    assert_eq!(engine.retry_len(), 2);
    assert_eq!(engine.pending_len(), 2);

    engine.cancel();
    let start = Instant::now();
    assert_eq!(
        engine.drain().await,
        DrainOutcome::Cancelled { discarded: 4 }
    );
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn every_operation_settles_exactly_once() {
    // Fate by id: 0 always fails, 1 throttled once, 2 fails once, the rest succeed.
    let mut seen: HashMap<(u32, u32), u32> = HashMap::new();
    let transport: Arc<ScriptedTransport<u32, ()>> =
        Arc::new(ScriptedTransport::per_item(move |req: &u32| {
            let (id, step) = (req / 10, req % 10);
            let attempt = seen.entry((id, step)).or_insert(0);
            *attempt += 1;
            match (id % 4, *attempt) {
                (0, _) => Err(Fault::new(FaultCode::ServerError, "broken")),
                (1, 1) => Err(Fault::throttled(Duration::from_millis(700))),
                (2, 1) => Err(Fault::new(FaultCode::Conflict, "busy")),
                _ => Ok(()),
            }
        }));
    let (errors, sink) = failures();
    let completions = Arc::new(Mutex::new(Vec::new()));
    let mut engine = BatchEngine::<Op>::builder(transport)
        .config(
            EngineConfig::new()
                .with_batch_size(7)
                .with_max_retries(2)
                .with_retry_delay(Duration::from_millis(250)),
        )
        .on_error(sink)
        .build()
        .unwrap();

    for id in 0..24u32 {
        let done = Arc::clone(&completions);
        let op = Op::upsert(id, vec![id * 10, id * 10 + 1])
            .with_step_success(1, move |_| done.lock().unwrap().push(id));
        engine.enqueue(op).await.unwrap();
    }
    engine.flush().await;
    assert_eq!(engine.drain().await, DrainOutcome::Completed);

    let completed: Vec<u32> = completions.lock().unwrap().clone();
    let errored: Vec<u32> = errors.lock().unwrap().iter().map(|(id, _)| *id).collect();
    let completed_set: HashSet<u32> = completed.iter().copied().collect();
    let errored_set: HashSet<u32> = errored.iter().copied().collect();

    assert_eq!(completed.len(), completed_set.len());
    assert_eq!(errored.len(), errored_set.len());
    assert!(completed_set.is_disjoint(&errored_set));
    assert_eq!(completed_set.len() + errored_set.len(), 24);
    assert!(errored_set.iter().all(|id| id % 4 == 0));
    assert_eq!(errored_set.len(), 6);

    let stats = engine.stats();
    assert_eq!(stats.operations_completed, 18);
    assert_eq!(stats.operations_errored, 6);
    assert_eq!(stats.operations_settled(), stats.operations_enqueued);
}

#[tokio::test(start_paused = true)]
async fn shared_drain_wakes_for_an_earlier_retry() {
    let start = Instant::now();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&sent);
    let mut attempts: HashMap<u32, u32> = HashMap::new();
    let transport: Arc<ScriptedTransport<u32, ()>> =
        Arc::new(ScriptedTransport::per_item(move |id: &u32| {
            log.lock().unwrap().push((*id, start.elapsed()));
            let attempt = attempts.entry(*id).or_insert(0);
            *attempt += 1;
            match (*id, *attempt) {
                (1, 1) => Err(Fault::throttled(Duration::from_secs(60))),
                (2, 1) => Err(Fault::new(FaultCode::ServerError, "transient")),
                _ => Ok(()),
            }
        }));
    let engine = BatchEngine::<Op>::builder(transport)
        .config(
            EngineConfig::new()
                .with_batch_size(1)
                .with_retry_delay(Duration::from_secs(1)),
        )
        .build()
        .unwrap()
        .into_shared();

    engine.enqueue(Op::request(1, 1)).await.unwrap();
    let drainer = engine.clone();
    let drain = tokio::spawn(async move { drainer.drain().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.enqueue(Op::request(2, 2)).await.unwrap();
    assert_eq!(drain.await.unwrap(), DrainOutcome::Completed);

    assert_eq!(
        *sent.lock().unwrap(),
        vec![
            (1, Duration::ZERO),
            (2, Duration::from_millis(10)),
            (2, Duration::from_millis(1010)),
            (1, Duration::from_secs(60)),
        ]
    );
}

/// Records how many calls overlap and which identity each ran as.
#[derive(Default)]
struct SerialRecorder {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<(Option<String>, Vec<(String, u32)>)>>,
}

#[async_trait]
impl BatchTransport<(String, u32), ()> for SerialRecorder {
    async fn execute(
        &self,
        requests: &[(String, u32)],
        ctx: &ExecutionContext,
    ) -> Result<Vec<Outcome<()>>, Fault> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.calls
            .lock()
            .unwrap()
            .push((ctx.run_as.clone(), requests.to_vec()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(requests.iter().map(|_| Ok(())).collect())
    }

    fn name(&self) -> &'static str {
        "serial-recorder"
    }
}

#[tokio::test(start_paused = true)]
async fn shared_engine_serializes_batches_across_producers() {
    type Tagged = OperationContext<(String, u32), (), u32>;

    let recorder = Arc::new(SerialRecorder::default());
    let engine = BatchEngine::<Tagged>::builder(recorder.clone())
        .config(EngineConfig::new().with_batch_size(8))
        .build()
        .unwrap()
        .into_shared();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let group = format!("producer-{p}");
                for n in 0..25u32 {
                    let op = Tagged::request(p * 100 + n, (group.clone(), n)).with_group(&group);
                    engine.enqueue(op).await.unwrap();
                }
            })
        })
        .collect();
    for handle in producers {
        handle.await.unwrap();
    }
    engine.flush().await;
    assert_eq!(engine.drain().await, DrainOutcome::Completed);

    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    let calls = recorder.calls.lock().unwrap();
    let total: usize = calls.iter().map(|(_, reqs)| reqs.len()).sum();
    assert_eq!(total, 100);
    for (run_as, reqs) in calls.iter() {
        assert!(reqs.len() <= 8);
        assert!(reqs.iter().all(|(group, _)| Some(group) == run_as.as_ref()));
    }
    assert_eq!(engine.stats().await.operations_completed, 100);
    assert!(engine.is_idle().await);
}
