//! Request serializer: every outbound command goes through one queue that only
//! the update worker consumes. Callers wait on a oneshot keyed by correlation id.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{domain::CorrelationId, errors::Error, messaging::types::ApiArgs, Result};

/// A queued command, consumed exactly once by the worker.
#[derive(Debug)]
pub(crate) struct OutboundRequest {
    pub id: CorrelationId,
    pub command: String,
    pub args: ApiArgs,
}

type Slot = oneshot::Sender<Result<Value>>;

/// Correlation id -> waiting caller.
///
/// An id stays in the map until the worker publishes its result, so it cannot be
/// handed out twice while a caller still waits on it.
#[derive(Default)]
pub(crate) struct PendingResults {
    slots: Mutex<HashMap<CorrelationId, Slot>>,
}

impl PendingResults {
    fn slots(&self) -> MutexGuard<'_, HashMap<CorrelationId, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Draw a random id that is not pending and park a slot under it.
    pub fn register(&self) -> (CorrelationId, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots();
        let id = loop {
            let candidate = CorrelationId(rand::random::<u64>());
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };
        slots.insert(id, tx);
        (id, rx)
    }

    /// Hand a result to the caller waiting on `id`.
    ///
    /// Returns `false` if nobody waits any more (unknown id or caller gone).
    pub fn publish(&self, id: CorrelationId, result: Result<Value>) -> bool {
        let Some(slot) = self.slots().remove(&id) else {
            tracing::warn!(correlation_id = %id, "result for unknown correlation id");
            return false;
        };
        slot.send(result).is_ok()
    }

    /// Whether the caller behind `id` still waits for its result.
    ///
    /// A slot whose caller went away (cancelled or timed out) is dropped here,
    /// so its request is never sent.
    pub fn still_waiting(&self, id: CorrelationId) -> bool {
        let mut slots = self.slots();
        match slots.get(&id) {
            Some(slot) if !slot.is_closed() => true,
            Some(_) => {
                slots.remove(&id);
                false
            }
            None => false,
        }
    }

    pub fn discard(&self, id: CorrelationId) {
        self.slots().remove(&id);
    }

    /// Drop every slot; waiting callers observe [`Error::EngineStopped`].
    pub fn fail_all(&self) -> usize {
        let mut slots = self.slots();
        let n = slots.len();
        slots.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }
}

/// Submission side of the outbound queue. Cheap to share.
pub(crate) struct RequestSerializer {
    tx: mpsc::UnboundedSender<OutboundRequest>,
    pending: PendingResults,
}

impl RequestSerializer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                pending: PendingResults::default(),
            },
            rx,
        )
    }

    pub fn pending(&self) -> &PendingResults {
        &self.pending
    }

    /// Queue `command` and wait for the worker to publish its result.
    pub async fn submit(&self, command: &str, args: ApiArgs) -> Result<Value> {
        let (id, rx) = self.pending.register();
        let req = OutboundRequest {
            id,
            command: command.to_string(),
            args,
        };

        if self.tx.send(req).is_err() {
            self.pending.discard(id);
            return Err(Error::EngineStopped);
        }
        tracing::debug!(correlation_id = %id, command, "queued outbound request");

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::EngineStopped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_ids_are_distinct() {
        let pending = PendingResults::default();
        let mut ids = std::collections::HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..1000 {
            let (id, rx) = pending.register();
            assert!(ids.insert(id));
            receivers.push(rx);
        }
        assert_eq!(pending.len(), 1000);
    }

    #[tokio::test]
    async fn publish_reaches_only_its_caller() {
        let pending = PendingResults::default();
        let (a, rx_a) = pending.register();
        let (b, rx_b) = pending.register();

        assert!(pending.publish(b, Ok(json!("b"))));
        assert!(pending.publish(a, Ok(json!("a"))));
        assert!(!pending.publish(a, Ok(json!("again"))));

        assert_eq!(rx_a.await.unwrap().unwrap(), json!("a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("b"));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn abandoned_slots_are_not_waiting() {
        let pending = PendingResults::default();
        let (kept, _rx_kept) = pending.register();
        let (gone, rx_gone) = pending.register();
        drop(rx_gone);

        assert!(pending.still_waiting(kept));
        assert!(!pending.still_waiting(gone));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_fails_fast() {
        let (serializer, rx) = RequestSerializer::new();
        drop(rx);
        let err = serializer
            .submit("sendMessage", ApiArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineStopped));
        assert_eq!(serializer.pending().len(), 0);
    }

    #[tokio::test]
    async fn fail_all_wakes_waiters() {
        let (serializer, _rx) = RequestSerializer::new();
        let serializer = std::sync::Arc::new(serializer);
        let waiter = {
            let s = serializer.clone();
            tokio::spawn(async move { s.submit("getMe", ApiArgs::new()).await })
        };
        while serializer.pending().len() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(serializer.pending().fail_all(), 1);
        assert!(matches!(waiter.await.unwrap(), Err(Error::EngineStopped)));
    }
}
