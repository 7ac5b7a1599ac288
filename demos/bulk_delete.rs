//! Bulk Delete Example
//!
//! This example runs a delete-if-exists job against a simulated service:
//! - records owned by different users are batched separately (run-as isolation)
//! - "not found" responses count as success
//! - the service throttles the first batch, which is rescheduled without spending retries
//! - one record is permanently locked and is reported through the error callback
//! - a confirmation gate refuses to touch the "admin" user's records
//!
//! Usage:
//!   RUST_LOG=bulk_dispatch=debug cargo run --example bulk_delete

use bulk_dispatch::{
    BatchEngine, BatchPreview, EngineConfig, ExecutionContext, Fault, FaultCode, FnGate,
    OperationContext, OperationFailure, ScriptedTransport,
};
use std::sync::Arc;
use std::time::Duration;

type Delete = OperationContext<String, (), u32>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    println!("=== Bulk Dispatch Delete Demo ===\n");

    let mut first_call = true;
    let responder = move |requests: &[String], _ctx: &ExecutionContext| {
        if std::mem::take(&mut first_call) {
            return Err(Fault::from_service("0x80072322", "number of requests exceeded")
                .with_retry_after(Duration::from_secs(1)));
        }
        Ok(requests
            .iter()
            .map(|req| {
                if req.ends_with("(13)") {
                    Err(Fault::new(FaultCode::Conflict, "record is locked"))
                } else if req.ends_with("0)") {
                    Err(Fault::from_service("0x80040217", "does not exist"))
                } else {
                    Ok(())
                }
            })
            .collect())
    };
    let transport = Arc::new(ScriptedTransport::new(responder));

    let config = EngineConfig::new()
        .with_batch_size(8)
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(300))
        .with_bypass_automation(["plugins", "workflows"])
        .with_env_overrides()?;

    let gate = FnGate::new(|preview: &BatchPreview<'_, String>| {
        let allowed = preview.group != Some("admin");
        println!(
            "confirm {} requests for {:?}: {}",
            preview.requests.len(),
            preview.group,
            if allowed { "yes" } else { "no" }
        );
        allowed
    });

    let mut engine = BatchEngine::<Delete>::builder(transport.clone())
        .config(config)
        .gate(Arc::new(gate))
        .on_error(|id: u32, failure: OperationFailure| {
            println!(
                "record {} failed after {} attempts: {}",
                id, failure.attempts, failure.fault
            );
        })
        .build()?;

    for id in 0..40u32 {
        let owner = match id {
            0..=14 => "alice",
            15..=29 => "bob",
            _ => "admin",
        };
        let op = Delete::delete(id, format!("DELETE accounts({id})"))
            .ignore_missing()
            .with_group(owner);
        engine.enqueue(op).await?;
    }
    engine.flush().await;
    let outcome = engine.drain().await;

    println!("\ndrain finished: {:?}", outcome);
    println!("remote calls: {}", transport.call_count());
    println!("stats: {}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}
