//! Update worker: the only code that talks to the transport or moves the cursor.
//!
//! Each iteration either drains one queued outbound request or, when the queue
//! stays empty for `queue_poll_interval`, long-polls for updates and dispatches
//! them in arrival order.

use std::sync::atomic::Ordering;

use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    engine::{executor::panic_message, serializer::OutboundRequest, Engine, WorkerStatus},
    errors::Error,
    fault::{Fault, FaultOrigin},
    messaging::{
        types::api_args,
        update::{parse_batch, Update},
    },
    Result,
};

const GET_UPDATES: &str = "getUpdates";

/// Run the worker to completion and publish how it ended.
pub(crate) async fn supervise(engine: Engine, rx: mpsc::UnboundedReceiver<OutboundRequest>) {
    let worker = tokio::spawn(run(engine.clone(), rx));
    let result = match worker.await {
        Ok(r) => r,
        Err(e) if e.is_panic() => Err(Error::WorkerFailed(format!(
            "update worker panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(_) => Err(Error::WorkerFailed("update worker was aborted".to_string())),
    };

    let orphaned = engine.serializer().pending().fail_all();
    if orphaned > 0 {
        tracing::warn!(orphaned, "outbound requests abandoned by stopped worker");
    }

    match result {
        Ok(()) => {
            tracing::info!(offset = engine.offset(), "update worker stopped");
            engine.set_status(WorkerStatus::Stopped);
        }
        Err(e) => {
            let message = e.to_string();
            engine.report(&Fault::new(FaultOrigin::Worker, message.clone()));
            engine.set_status(WorkerStatus::Failed(message));
        }
    }
}

async fn run(engine: Engine, mut rx: mpsc::UnboundedReceiver<OutboundRequest>) -> Result<()> {
    let result = worker_loop(&engine, &mut rx).await;

    // Refuse new work, then drop whatever is still queued; supervise() wakes the callers.
    rx.close();
    while rx.try_recv().is_ok() {}

    result
}

async fn worker_loop(engine: &Engine, rx: &mut mpsc::UnboundedReceiver<OutboundRequest>) -> Result<()> {
    let shutdown = engine.shutdown_token();
    let interval = engine.config().queue_poll_interval;
    tracing::info!(offset = engine.offset(), "update worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            next = tokio::time::timeout(interval, rx.recv()) => next,
        };

        match next {
            Ok(Some(req)) => drain(engine, req).await,
            Ok(None) => return Ok(()),
            Err(_) => {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(()),
                    polled = poll_updates(engine) => polled?,
                }
            }
        }
    }
}

/// Perform one outbound call and publish its result to the waiting caller.
///
/// Requests whose caller is gone are dropped unsent. Remote and transport
/// failures belong to the caller, not to the worker.
async fn drain(engine: &Engine, req: OutboundRequest) {
    let OutboundRequest { id, command, args } = req;
    if !engine.serializer().pending().still_waiting(id) {
        tracing::debug!(correlation_id = %id, command = %command, "dropping request of a cancelled caller");
        return;
    }
    let result = match engine.transport().call(&command, &args).await {
        Ok(resp) => resp.into_result(),
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        tracing::warn!(correlation_id = %id, command = %command, "outbound request failed: {e}");
    }
    let delivered = engine.serializer().pending().publish(id, result);
    tracing::debug!(correlation_id = %id, command = %command, delivered, "published result");
}

/// Fetch one batch past the cursor, advance the cursor, dispatch in order.
async fn poll_updates(engine: &Engine) -> Result<()> {
    let cfg = engine.config();
    let offset = engine.offset();

    let mut args = api_args([
        ("offset", json!(offset)),
        ("timeout", json!(cfg.long_poll_timeout.as_secs())),
    ]);
    if let Some(allowed) = &cfg.allowed_updates {
        args.insert("allowed_updates".to_string(), json!(allowed));
    }

    tracing::trace!(offset, "polling for updates");
    let result = engine.transport().call(GET_UPDATES, &args).await?.into_result()?;
    let batch = parse_batch(result)?;
    if batch.is_empty() {
        return Ok(());
    }

    let fresh = filter_seen(batch, offset);
    if let Some(max) = fresh.iter().filter_map(|u| u.update_id().ok()).max() {
        let next = max.saturating_add(1);
        let prev = engine.cursor().fetch_max(next, Ordering::SeqCst);
        tracing::trace!(from = prev, to = prev.max(next), "advanced update offset");
    }

    for update in fresh {
        engine.dispatch(update);
    }
    Ok(())
}

/// Drop events the cursor already moved past; keep arrival order.
fn filter_seen(batch: Vec<Update>, offset: i64) -> Vec<Update> {
    batch
        .into_iter()
        .filter(|u| match u.update_id() {
            Ok(id) if id < offset => {
                tracing::warn!(update_id = id, offset, "dropping already delivered update");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("dispatching update without usable update_id: {e}");
                true
            }
        })
        .collect()
}
