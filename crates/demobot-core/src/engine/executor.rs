//! Ephemeral executor: one task per (listener, event), bounded by the entry's
//! timeout.
//!
//! Cancellation is cooperative first (the context's token is cancelled) and then
//! enforced: the invocation task is aborted and awaited, so once the supervisor
//! returns, listener code can no longer run.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::task::{JoinError, JoinHandle};

use crate::{
    engine::{
        registry::{Flow, ListenerContext, ListenerEntry},
        Engine,
    },
    fault::{Fault, FaultOrigin},
    messaging::update::Update,
    Result,
};

/// How one invocation ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Finished(Flow),
    Failed(String),
    TimedOut,
    Aborted,
}

/// Start `entry` for `update` and return the supervising task.
///
/// Dispatch never waits on the handle; tests do.
pub(crate) fn spawn(engine: &Engine, entry: ListenerEntry, update: Arc<Update>) -> JoinHandle<()> {
    let engine = engine.clone();
    tokio::spawn(async move {
        let unsubscribe = Arc::new(AtomicBool::new(false));
        let outcome = run(&engine, &entry, update, unsubscribe.clone()).await;
        settle(&engine, &entry, outcome, unsubscribe.load(Ordering::SeqCst));
    })
}

async fn run(
    engine: &Engine,
    entry: &ListenerEntry,
    update: Arc<Update>,
    unsubscribe_requested: Arc<AtomicBool>,
) -> Outcome {
    let cancel = engine.shutdown_token().child_token();
    let ctx = ListenerContext {
        engine: engine.clone(),
        update,
        listener_id: entry.id,
        cancel: cancel.clone(),
        unsubscribe_requested,
    };
    let listener = entry.listener.clone();
    let mut task: JoinHandle<Result<Flow>> =
        tokio::spawn(async move { listener.on_update(ctx).await });

    match tokio::time::timeout(entry.timeout, &mut task).await {
        Ok(joined) => outcome_of(joined),
        Err(_) => {
            cancel.cancel();
            task.abort();
            // Wait until the task is really gone; a listener that finished in the
            // meantime still counts as timed out.
            let _ = task.await;
            Outcome::TimedOut
        }
    }
}

fn outcome_of(joined: std::result::Result<Result<Flow>, JoinError>) -> Outcome {
    match joined {
        Ok(Ok(flow)) => Outcome::Finished(flow),
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(e) if e.is_panic() => Outcome::Failed(format!(
            "listener panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(_) => Outcome::Aborted,
    }
}

/// Apply an invocation's outcome. An unsubscribe request made through the
/// context counts even when the listener then failed.
fn settle(engine: &Engine, entry: &ListenerEntry, outcome: Outcome, unsubscribe_requested: bool) {
    let unsubscribe =
        unsubscribe_requested || matches!(outcome, Outcome::Finished(Flow::Unsubscribe));
    match outcome {
        Outcome::Finished(_) => {
            tracing::trace!(listener = %entry.id, label = %entry.label, "listener finished");
        }
        Outcome::Failed(message) => {
            engine.report(&Fault::new(FaultOrigin::Listener { id: entry.id }, message));
        }
        Outcome::TimedOut => {
            tracing::warn!(
                listener = %entry.id,
                label = %entry.label,
                timeout_secs = entry.timeout.as_secs_f64(),
                "listener timed out and was cancelled"
            );
        }
        Outcome::Aborted => {
            tracing::debug!(listener = %entry.id, label = %entry.label, "listener aborted");
        }
    }

    if unsubscribe {
        let removed = engine.remove_listener(entry.id);
        tracing::debug!(listener = %entry.id, label = %entry.label, removed, "listener unsubscribed");
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }

    #[test]
    fn errors_become_failures() {
        let out = outcome_of(Ok(Err(crate::Error::listener("nope"))));
        assert!(matches!(out, Outcome::Failed(m) if m.contains("nope")));
        assert!(matches!(
            outcome_of(Ok(Ok(Flow::Unsubscribe))),
            Outcome::Finished(Flow::Unsubscribe)
        ));
    }
}
