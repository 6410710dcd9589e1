//! Thin typed wrappers over [`Engine::submit`] for the Bot API calls the bot uses.

use std::time::Duration;

use serde_json::{json, Value};

use crate::{
    config::{check_timeout, MAX_INLINE_TIMEOUT},
    domain::{ChatId, ListenerId, MessageId, UserId},
    engine::{Engine, InlineHandler},
    errors::Error,
    messaging::types::{api_args, InlineKeyboard},
    Result,
};

#[derive(Clone)]
pub struct BotApi {
    engine: Engine,
}

impl BotApi {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<Value> {
        self.engine
            .submit(
                "sendMessage",
                api_args([("chat_id", json!(chat_id.0)), ("text", json!(text))]),
            )
            .await
    }

    /// Options are passed through as-is; the remote API rejects invalid ones.
    pub async fn send_poll(&self, chat_id: ChatId, question: &str, options: &[String]) -> Result<Value> {
        self.engine
            .submit(
                "sendPoll",
                api_args([
                    ("chat_id", json!(chat_id.0)),
                    ("question", json!(question)),
                    ("options", json!(options)),
                ]),
            )
            .await
    }

    /// Ban `user_id` until the unix timestamp `until_date` (0 = forever).
    pub async fn kick_chat_member(&self, chat_id: ChatId, user_id: UserId, until_date: i64) -> Result<Value> {
        self.engine
            .submit(
                "banChatMember",
                api_args([
                    ("chat_id", json!(chat_id.0)),
                    ("user_id", json!(user_id.0)),
                    ("until_date", json!(until_date)),
                ]),
            )
            .await
    }

    pub async fn send_error_message(&self, chat_id: ChatId, err: &Error) -> Result<Value> {
        self.send_message(chat_id, &format!("Error: {err}")).await
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> Result<Value> {
        let mut args = api_args([("callback_query_id", json!(callback_query_id))]);
        if let Some(text) = text {
            args.insert("text".to_string(), json!(text));
        }
        self.engine.submit("answerCallbackQuery", args).await
    }

    /// Send `text` with `keyboard` attached and route the first button press on
    /// it to `handler`.
    pub async fn send_inline_question<H>(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &InlineKeyboard,
        handler: H,
        timeout: Duration,
    ) -> Result<(MessageId, ListenerId)>
    where
        H: InlineHandler + 'static,
    {
        check_timeout(timeout, MAX_INLINE_TIMEOUT, "inline listener")?;
        if keyboard.is_empty() {
            return Err(Error::Config("inline question needs at least one button".to_string()));
        }

        let sent = self
            .engine
            .submit(
                "sendMessage",
                api_args([
                    ("chat_id", json!(chat_id.0)),
                    ("text", json!(text)),
                    ("reply_markup", keyboard.to_reply_markup()),
                ]),
            )
            .await?;
        let message_id = sent
            .get("message_id")
            .and_then(Value::as_i64)
            .map(MessageId)
            .ok_or_else(|| Error::shape("sendMessage result has no message_id"))?;

        let listener = self
            .engine
            .add_inline_listener(message_id, chat_id, handler, timeout)?;
        Ok((message_id, listener))
    }
}
