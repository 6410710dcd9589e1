//! Listener registry: generic entries plus the command and inline indexes that
//! the dispatch shims consult.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatId, ListenerId, MessageId, MessageRef, UserId},
    engine::Engine,
    messaging::update::Update,
    Result,
};

/// What a listener wants after an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Stay registered.
    Continue,
    /// Remove the entry that produced this invocation.
    Unsubscribe,
}

/// Everything a message listener gets for one event.
#[derive(Clone)]
pub struct ListenerContext {
    pub engine: Engine,
    pub update: Arc<Update>,
    pub listener_id: ListenerId,
    /// Set when the invocation times out or the engine shuts down.
    pub cancel: CancellationToken,
    pub(crate) unsubscribe_requested: Arc<AtomicBool>,
}

impl ListenerContext {
    /// Remove this listener once the invocation ends, whether it returns `Ok`,
    /// fails or panics.
    pub fn unsubscribe(&self) {
        self.unsubscribe_requested.store(true, Ordering::SeqCst);
    }
}

/// A matched `/command` addressed to this bot.
#[derive(Clone)]
pub struct CommandContext {
    pub engine: Engine,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub command: String,
    /// Text after the command token, trimmed.
    pub args: String,
    pub update: Arc<Update>,
    pub cancel: CancellationToken,
}

/// A button press on a message we registered an inline listener for.
#[derive(Clone)]
pub struct InlineContext {
    pub engine: Engine,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub data: String,
    pub callback_query_id: String,
    pub from: Option<UserId>,
    pub cancel: CancellationToken,
}

/// Invoked once per dispatched event.
///
/// Listener code runs inside its own task and is aborted at its next `.await`
/// once its timeout passes. Blocking work belongs in `spawn_blocking`.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_update(&self, ctx: ListenerContext) -> Result<Flow>;
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn on_command(&self, ctx: CommandContext) -> Result<()>;
}

#[async_trait]
pub trait InlineHandler: Send + Sync {
    async fn on_callback(&self, ctx: InlineContext) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MessageListener for F
where
    F: Fn(ListenerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow>> + Send + 'static,
{
    async fn on_update(&self, ctx: ListenerContext) -> Result<Flow> {
        (self)(ctx).await
    }
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_command(&self, ctx: CommandContext) -> Result<()> {
        (self)(ctx).await
    }
}

#[async_trait]
impl<F, Fut> InlineHandler for F
where
    F: Fn(InlineContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_callback(&self, ctx: InlineContext) -> Result<()> {
        (self)(ctx).await
    }
}

/// One registration: the listener and the timeout its invocations run under.
#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub id: ListenerId,
    pub label: String,
    pub timeout: Duration,
    pub listener: Arc<dyn MessageListener>,
}

#[derive(Clone)]
pub(crate) struct CommandBinding {
    /// Shim entry that currently owns the command name.
    pub owner: ListenerId,
    pub handler: Arc<dyn CommandHandler>,
}

#[derive(Clone)]
pub(crate) struct InlineBinding {
    pub owner: ListenerId,
    pub handler: Arc<dyn InlineHandler>,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<ListenerEntry>,
    commands: HashMap<String, CommandBinding>,
    inline: HashMap<MessageRef, InlineBinding>,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // Listener panics happen in their own tasks, never under this lock.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn push(&self, entry: ListenerEntry) {
        self.state().entries.push(entry);
    }

    /// Register a command shim entry and make it the owner of `name`.
    pub fn push_command(&self, name: &str, entry: ListenerEntry, handler: Arc<dyn CommandHandler>) {
        let mut st = self.state();
        st.commands.insert(
            name.to_string(),
            CommandBinding {
                owner: entry.id,
                handler,
            },
        );
        st.entries.push(entry);
    }

    pub fn push_inline(&self, key: MessageRef, entry: ListenerEntry, handler: Arc<dyn InlineHandler>) {
        let mut st = self.state();
        st.inline.insert(
            key,
            InlineBinding {
                owner: entry.id,
                handler,
            },
        );
        st.entries.push(entry);
    }

    /// Remove an entry and any index binding it owns.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut st = self.state();
        let before = st.entries.len();
        st.entries.retain(|e| e.id != id);
        st.commands.retain(|_, b| b.owner != id);
        st.inline.retain(|_, b| b.owner != id);
        st.entries.len() != before
    }

    /// Copy of the current entries, taken under the lock and used after release.
    pub fn snapshot(&self) -> Vec<ListenerEntry> {
        self.state().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.state().entries.iter().any(|e| e.id == id)
    }

    pub fn command(&self, name: &str) -> Option<CommandBinding> {
        self.state().commands.get(name).cloned()
    }

    pub fn has_inline(&self, key: MessageRef) -> bool {
        self.state().inline.contains_key(&key)
    }

    /// Take the inline binding for `key` if `owner` still holds it.
    ///
    /// At most one caller ever gets `Some` for a given registration.
    pub fn claim_inline(&self, key: MessageRef, owner: ListenerId) -> Option<InlineBinding> {
        let mut st = self.state();
        match st.inline.get(&key) {
            Some(b) if b.owner == owner => st.inline.remove(&key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn entry(reg: &ListenerRegistry, label: &str) -> ListenerEntry {
        let listener: Arc<dyn MessageListener> =
            Arc::new(|_ctx: ListenerContext| async { Ok::<_, Error>(Flow::Continue) });
        ListenerEntry {
            id: reg.next_id(),
            label: label.to_string(),
            timeout: Duration::from_secs(1),
            listener,
        }
    }

    fn noop_command() -> Arc<dyn CommandHandler> {
        Arc::new(|_ctx: CommandContext| async { Ok::<_, Error>(()) })
    }

    fn noop_inline() -> Arc<dyn InlineHandler> {
        Arc::new(|_ctx: InlineContext| async { Ok::<_, Error>(()) })
    }

    #[test]
    fn ids_are_unique_and_removal_is_by_id() {
        let reg = ListenerRegistry::new();
        let a = entry(&reg, "a");
        let b = entry(&reg, "b");
        let (a_id, b_id) = (a.id, b.id);
        assert_ne!(a_id, b_id);
        reg.push(a);
        reg.push(b);

        assert!(reg.remove(a_id));
        assert!(!reg.remove(a_id));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(b_id));
    }

    #[test]
    fn last_command_registration_owns_the_name() {
        let reg = ListenerRegistry::new();
        let first = entry(&reg, "cmd");
        let second = entry(&reg, "cmd");
        let second_id = second.id;
        reg.push_command("report", first, noop_command());
        reg.push_command("report", second, noop_command());

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.command("report").map(|b| b.owner), Some(second_id));
    }

    #[test]
    fn removing_the_owner_drops_the_binding() {
        let reg = ListenerRegistry::new();
        let e = entry(&reg, "cmd");
        let id = e.id;
        reg.push_command("ping", e, noop_command());
        assert!(reg.remove(id));
        assert!(reg.command("ping").is_none());
    }

    #[test]
    fn inline_claim_happens_once() {
        let reg = ListenerRegistry::new();
        let key = MessageRef {
            chat_id: ChatId(7),
            message_id: MessageId(42),
        };
        let e = entry(&reg, "inline");
        let id = e.id;
        reg.push_inline(key, e, noop_inline());

        assert!(reg.has_inline(key));
        assert!(reg.claim_inline(key, ListenerId(id.0 + 100)).is_none());
        assert!(reg.claim_inline(key, id).is_some());
        assert!(reg.claim_inline(key, id).is_none());
        assert!(!reg.has_inline(key));
    }
}
