//! Dispatch shims: the generic listeners behind command and inline registrations.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::{
    domain::{ChatId, ChatKind, MessageRef, UserId},
    engine::registry::{CommandContext, Flow, InlineContext, ListenerContext, MessageListener},
    messaging::update::{Update, UpdateKind},
    Result,
};

/// A `/command` found at the start of a message addressed to this bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommandMatch {
    pub command: String,
    pub args: String,
    pub chat_id: ChatId,
    pub user_id: UserId,
}

fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^/([A-Za-z0-9_]+)(?:@([A-Za-z0-9_]+))?(?:\s+|$)").expect("valid command regex")
    })
}

/// Parse the command in `update`, if it is one and it is meant for `bot_username`.
///
/// `Ok(None)` means "not for us"; `Err` means the event lacked a field we need.
pub(crate) fn match_command(update: &Update, bot_username: &str) -> Result<Option<CommandMatch>> {
    let text = update.text()?;
    let Some(caps) = command_re().captures(text) else {
        return Ok(None);
    };

    let bot = bot_username.trim_start_matches('@');
    let suffix = caps.get(2).map(|m| m.as_str());
    if let Some(other) = suffix {
        if !other.eq_ignore_ascii_case(bot) {
            return Ok(None);
        }
    }

    let mentioned = suffix.is_some() || mentions(text, bot);
    if !mentioned && update.chat_kind()? != ChatKind::Private {
        return Ok(None);
    }

    let whole = caps.get(0).map_or(0, |m| m.end());
    Ok(Some(CommandMatch {
        command: caps[1].to_string(),
        args: text[whole..].trim().to_string(),
        chat_id: update.chat_id()?,
        user_id: update.sender_id()?,
    }))
}

fn mentions(text: &str, bot: &str) -> bool {
    if bot.is_empty() {
        return false;
    }
    text.split_whitespace().any(|word| {
        word.strip_prefix('@')
            .map(|w| w.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
            .is_some_and(|w| w.eq_ignore_ascii_case(bot))
    })
}

/// Generic listener that forwards matching `/name` messages to the command index.
pub(crate) struct CommandShim {
    pub name: String,
}

#[async_trait]
impl MessageListener for CommandShim {
    async fn on_update(&self, ctx: ListenerContext) -> Result<Flow> {
        if ctx.update.kind() != UpdateKind::Message {
            return Ok(Flow::Continue);
        }

        let matched = match match_command(&ctx.update, &ctx.engine.config().bot_username) {
            Ok(Some(m)) if m.command == self.name => m,
            Ok(_) => return Ok(Flow::Continue),
            Err(e) => {
                tracing::trace!(command = %self.name, "ignored update while matching command: {e}");
                return Ok(Flow::Continue);
            }
        };

        // A later registration for the same name supersedes this one.
        let Some(binding) = ctx.engine.registry().command(&self.name) else {
            return Ok(Flow::Continue);
        };
        if binding.owner != ctx.listener_id {
            return Ok(Flow::Continue);
        }

        tracing::info!(
            command = %matched.command,
            chat_id = matched.chat_id.0,
            user_id = matched.user_id.0,
            "running command"
        );
        binding
            .handler
            .on_command(CommandContext {
                engine: ctx.engine.clone(),
                chat_id: matched.chat_id,
                user_id: matched.user_id,
                command: matched.command,
                args: matched.args,
                update: ctx.update.clone(),
                cancel: ctx.cancel.clone(),
            })
            .await?;
        Ok(Flow::Continue)
    }
}

/// One-shot listener for callback queries on a single interactive message.
pub(crate) struct InlineShim {
    pub key: MessageRef,
}

#[async_trait]
impl MessageListener for InlineShim {
    async fn on_update(&self, ctx: ListenerContext) -> Result<Flow> {
        if ctx.update.kind() != UpdateKind::CallbackQuery {
            return Ok(Flow::Continue);
        }

        let query = match ctx.update.callback_query() {
            Ok(q) => q,
            Err(e) => {
                tracing::trace!("ignored malformed callback query: {e}");
                return Ok(Flow::Continue);
            }
        };
        if query.message != self.key {
            return Ok(Flow::Continue);
        }

        let Some(binding) = ctx.engine.registry().claim_inline(self.key, ctx.listener_id) else {
            return Ok(Flow::Unsubscribe);
        };
        // Claimed: the entry goes away whatever the handler does.
        ctx.engine.remove_listener(ctx.listener_id);

        tracing::info!(
            chat_id = self.key.chat_id.0,
            message_id = self.key.message_id.0,
            "running inline listener"
        );
        binding
            .handler
            .on_callback(InlineContext {
                engine: ctx.engine.clone(),
                chat_id: query.message.chat_id,
                message_id: query.message.message_id,
                data: query.data,
                callback_query_id: query.id,
                from: query.from,
                cancel: ctx.cancel.clone(),
            })
            .await?;
        Ok(Flow::Unsubscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::text_update;

    fn matched(text: &str, chat_type: &str) -> Option<CommandMatch> {
        match_command(&text_update(1, -100, chat_type, 5, text), "BotName").unwrap()
    }

    #[test]
    fn mention_suffix_matches() {
        let m = matched("/report@BotName hello", "supergroup").unwrap();
        assert_eq!(m.command, "report");
        assert_eq!(m.args, "hello");
        assert_eq!(m.chat_id, ChatId(-100));
        assert_eq!(m.user_id, UserId(5));
    }

    #[test]
    fn prefix_boundary_is_respected() {
        assert_eq!(matched("/reports@BotName hello", "group").unwrap().command, "reports");
        assert!(matched("/report-now@BotName", "group").is_none());
    }

    #[test]
    fn group_commands_need_a_mention() {
        assert!(matched("/report", "group").is_none());
        assert!(matched("/report spam", "supergroup").is_none());
        assert_eq!(matched("/report please @botname", "group").unwrap().command, "report");
    }

    #[test]
    fn private_chats_need_no_mention() {
        let m = matched("/report", "private").unwrap();
        assert_eq!(m.command, "report");
        assert_eq!(m.args, "");
    }

    #[test]
    fn commands_for_other_bots_are_ignored() {
        assert!(matched("/report@OtherBot", "private").is_none());
        assert!(matched("report@BotName", "private").is_none());
    }

    #[test]
    fn missing_fields_surface_as_shape_errors() {
        let u = Update::new(serde_json::json!({ "update_id": 1, "message": { "text": "/report" } }));
        assert!(match_command(&u, "BotName").is_err());
    }
}
