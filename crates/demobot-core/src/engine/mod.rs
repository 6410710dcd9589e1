//! Update-dispatch engine.
//!
//! One background worker owns the transport: it drains queued outbound commands
//! and, when idle, long-polls for updates. Every update is fanned out to all
//! registered listeners, each invocation in its own short-lived task.
//!
//! ```text
//! submit() ──► queue ──► worker ──► transport
//!    ▲                     │
//!    └── oneshot result ◄──┤
//!                          └──► getUpdates ──► dispatch ──► executor (task per listener)
//! ```

mod executor;
mod poller;
pub mod registry;
mod serializer;
mod shims;

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{check_timeout, EngineConfig, MAX_COMMAND_TIMEOUT, MAX_INLINE_TIMEOUT},
    domain::{ChatId, ListenerId, MessageId, MessageRef},
    errors::Error,
    fault::{Fault, FaultReporter},
    messaging::{port::BotTransport, types::ApiArgs, update::Update},
    Result,
};

pub use registry::{
    CommandContext, CommandHandler, Flow, InlineContext, InlineHandler, ListenerContext,
    MessageListener,
};

use registry::{ListenerEntry, ListenerRegistry};
use serializer::RequestSerializer;
use shims::{CommandShim, InlineShim};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Stopped,
    Failed(String),
}

/// Handle to a running engine. Clones share the same worker and registry.
///
/// The worker keeps running until [`Engine::shutdown`] or a fatal error, even if
/// every handle is dropped.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    cfg: EngineConfig,
    transport: Arc<dyn BotTransport>,
    reporter: Arc<dyn FaultReporter>,
    serializer: RequestSerializer,
    registry: ListenerRegistry,
    offset: AtomicI64,
    shutdown: CancellationToken,
    status: watch::Sender<WorkerStatus>,
}

impl Engine {
    /// Build the engine and spawn its update worker. Must run inside a tokio runtime.
    pub fn start(
        cfg: EngineConfig,
        transport: Arc<dyn BotTransport>,
        reporter: Arc<dyn FaultReporter>,
    ) -> Self {
        let (serializer, rx) = RequestSerializer::new();
        let (status, _) = watch::channel(WorkerStatus::Running);
        let engine = Self {
            inner: Arc::new(EngineInner {
                offset: AtomicI64::new(cfg.initial_offset),
                cfg,
                transport,
                reporter,
                serializer,
                registry: ListenerRegistry::new(),
                shutdown: CancellationToken::new(),
                status,
            }),
        };

        tokio::spawn(poller::supervise(engine.clone(), rx));
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    /// Send `command` to the remote API and wait for its result.
    ///
    /// Exactly one remote call is made. Failures are never retried here.
    pub async fn submit(&self, command: &str, args: ApiArgs) -> Result<Value> {
        self.inner.serializer.submit(command, args).await
    }

    /// Register a listener for every update, under the default listener timeout.
    pub fn add_message_listener<L>(&self, listener: L) -> Result<ListenerId>
    where
        L: MessageListener + 'static,
    {
        self.add_message_listener_with_timeout(listener, self.inner.cfg.default_listener_timeout)
    }

    pub fn add_message_listener_with_timeout<L>(&self, listener: L, timeout: Duration) -> Result<ListenerId>
    where
        L: MessageListener + 'static,
    {
        check_timeout(timeout, MAX_COMMAND_TIMEOUT, "message listener")?;
        let entry = self.entry("message".to_string(), timeout, Arc::new(listener));
        let id = entry.id;
        self.inner.registry.push(entry);
        tracing::info!(listener = %id, "added message listener");
        Ok(id)
    }

    /// Register `handler` for `/name` (or `/name@bot`). The latest registration
    /// for a name is the one that runs.
    pub fn add_command_listener<H>(&self, name: &str, handler: H, timeout: Duration) -> Result<ListenerId>
    where
        H: CommandHandler + 'static,
    {
        let name = name.trim().trim_start_matches('/');
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!("invalid command name {name:?}")));
        }
        check_timeout(timeout, MAX_COMMAND_TIMEOUT, "command listener")?;

        let shim = CommandShim {
            name: name.to_string(),
        };
        let entry = self.entry(format!("command /{name}"), timeout, Arc::new(shim));
        let id = entry.id;
        self.inner
            .registry
            .push_command(name, entry, Arc::new(handler));
        tracing::info!(listener = %id, "added listener for command /{name}");
        Ok(id)
    }

    /// Register a one-shot handler for button presses on one sent message.
    ///
    /// `timeout` is both the answer window and the handler's run limit: with no
    /// press within `timeout` the listener is removed unfired.
    pub fn add_inline_listener<H>(
        &self,
        message_id: MessageId,
        chat_id: ChatId,
        handler: H,
        timeout: Duration,
    ) -> Result<ListenerId>
    where
        H: InlineHandler + 'static,
    {
        check_timeout(timeout, MAX_INLINE_TIMEOUT, "inline listener")?;

        let key = MessageRef {
            chat_id,
            message_id,
        };
        let entry = self.entry(
            format!("inline {}@{}", message_id.0, chat_id.0),
            timeout,
            Arc::new(InlineShim { key }),
        );
        let id = entry.id;
        self.inner.registry.push_inline(key, entry, Arc::new(handler));
        tracing::info!(
            listener = %id,
            message_id = message_id.0,
            chat_id = chat_id.0,
            "added inline listener"
        );
        self.expire_after(id, timeout);
        Ok(id)
    }

    fn expire_after(&self, id: ListenerId, timeout: Duration) {
        let engine = self.clone();
        let shutdown = self.shutdown_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if engine.remove_listener(id) {
                        tracing::debug!(listener = %id, "inline listener expired unanswered");
                    }
                }
            }
        });
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.registry.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.inner.registry.contains(id)
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.inner.registry.command(name.trim_start_matches('/')).is_some()
    }

    pub fn has_inline(&self, message_id: MessageId, chat_id: ChatId) -> bool {
        self.inner.registry.has_inline(MessageRef {
            chat_id,
            message_id,
        })
    }

    /// Next update id the worker will ask for.
    pub fn offset(&self) -> i64 {
        self.inner.offset.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> WorkerStatus {
        self.inner.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status() == WorkerStatus::Running
    }

    /// Ask the worker and all running listeners to stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Resolve once the worker has exited; `Err` carries the fatal error.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.inner.status.subscribe();
        let status = rx
            .wait_for(|s| *s != WorkerStatus::Running)
            .await
            .map_err(|_| Error::EngineStopped)?
            .clone();
        match status {
            WorkerStatus::Failed(msg) => Err(Error::WorkerFailed(msg)),
            _ => Ok(()),
        }
    }

    /// Fan one update out to every registered listener.
    ///
    /// The registry lock is only held for the snapshot, so listeners may register
    /// or remove entries while they run.
    pub(crate) fn dispatch(&self, update: Update) -> Vec<JoinHandle<()>> {
        let update = Arc::new(update);
        let entries = self.inner.registry.snapshot();
        tracing::trace!(listeners = entries.len(), "dispatching update");
        entries
            .into_iter()
            .map(|entry| executor::spawn(self, entry, update.clone()))
            .collect()
    }

    fn entry(&self, label: String, timeout: Duration, listener: Arc<dyn MessageListener>) -> ListenerEntry {
        ListenerEntry {
            id: self.inner.registry.next_id(),
            label,
            timeout,
            listener,
        }
    }

    pub(crate) fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub(crate) fn serializer(&self) -> &RequestSerializer {
        &self.inner.serializer
    }

    pub(crate) fn transport(&self) -> &Arc<dyn BotTransport> {
        &self.inner.transport
    }

    pub(crate) fn cursor(&self) -> &AtomicI64 {
        &self.inner.offset
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub(crate) fn set_status(&self, status: WorkerStatus) {
        self.inner.status.send_replace(status);
    }

    pub(crate) fn report(&self, fault: &Fault) {
        self.inner.reporter.report(fault);
    }
}
