use serde_json::Value;

use crate::{
    domain::{ChatId, ChatKind, MessageId, MessageRef, UserId},
    errors::Error,
    Result,
};

/// One event of a `getUpdates` batch.
///
/// Kept as raw JSON: senders form an open federation and events routinely carry
/// fields we do not model. Accessors fail with [`Error::Shape`] when the path
/// they need is missing or has the wrong type.
#[derive(Clone, Debug, PartialEq)]
pub struct Update(Value);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Message,
    Poll,
    CallbackQuery,
    Other,
}

/// The parts of a `callback_query` the dispatcher routes on.
#[derive(Clone, Debug, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Option<UserId>,
    pub message: MessageRef,
    pub data: String,
}

impl Update {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn update_id(&self) -> Result<i64> {
        i64_at(&self.0, &["update_id"])
    }

    pub fn kind(&self) -> UpdateKind {
        if self.0.get("message").is_some() {
            UpdateKind::Message
        } else if self.0.get("callback_query").is_some() {
            UpdateKind::CallbackQuery
        } else if self.0.get("poll").is_some() {
            UpdateKind::Poll
        } else {
            UpdateKind::Other
        }
    }

    pub fn text(&self) -> Result<&str> {
        str_at(&self.0, &["message", "text"])
    }

    pub fn chat_id(&self) -> Result<ChatId> {
        i64_at(&self.0, &["message", "chat", "id"]).map(ChatId)
    }

    pub fn chat_kind(&self) -> Result<ChatKind> {
        let raw = str_at(&self.0, &["message", "chat", "type"])?;
        ChatKind::parse(raw).ok_or_else(|| Error::shape(format!("unknown chat type {raw:?}")))
    }

    pub fn sender_id(&self) -> Result<UserId> {
        i64_at(&self.0, &["message", "from", "id"]).map(UserId)
    }

    pub fn callback_query(&self) -> Result<CallbackQuery> {
        let q = value_at(&self.0, &["callback_query"])?;
        Ok(CallbackQuery {
            id: str_at(q, &["id"])?.to_string(),
            from: i64_at(q, &["from", "id"]).ok().map(UserId),
            message: MessageRef {
                chat_id: ChatId(i64_at(q, &["message", "chat", "id"])?),
                message_id: MessageId(i64_at(q, &["message", "message_id"])?),
            },
            data: str_at(q, &["data"]).unwrap_or_default().to_string(),
        })
    }
}

impl From<Value> for Update {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}

/// Split the `result` of a `getUpdates` call into events, in arrival order.
pub fn parse_batch(result: Value) -> Result<Vec<Update>> {
    match result {
        Value::Array(items) => Ok(items.into_iter().map(Update::new).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::shape(format!(
            "getUpdates result is not an array: {}",
            truncate(&other.to_string(), 120)
        ))),
    }
}

fn value_at<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value> {
    let mut cur = root;
    for key in path {
        cur = cur
            .get(key)
            .ok_or_else(|| Error::shape(format!("missing `{}`", path.join("."))))?;
    }
    Ok(cur)
}

fn str_at<'a>(root: &'a Value, path: &[&str]) -> Result<&'a str> {
    value_at(root, path)?
        .as_str()
        .ok_or_else(|| Error::shape(format!("`{}` is not a string", path.join("."))))
}

fn i64_at(root: &Value, path: &[&str]) -> Result<i64> {
    value_at(root, path)?
        .as_i64()
        .ok_or_else(|| Error::shape(format!("`{}` is not an integer", path.join("."))))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    format!("{}...", s.chars().take(max).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_accessors() {
        let u = Update::new(json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "text": "/report@DemoBot spam",
                "chat": { "id": -100, "type": "supergroup" },
                "from": { "id": 77 }
            }
        }));
        assert_eq!(u.update_id().unwrap(), 10);
        assert_eq!(u.kind(), UpdateKind::Message);
        assert_eq!(u.text().unwrap(), "/report@DemoBot spam");
        assert_eq!(u.chat_id().unwrap(), ChatId(-100));
        assert_eq!(u.chat_kind().unwrap(), ChatKind::Supergroup);
        assert_eq!(u.sender_id().unwrap(), UserId(77));
    }

    #[test]
    fn callback_query_accessor() {
        let u = Update::new(json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 3 },
                "data": "yes",
                "message": { "message_id": 42, "chat": { "id": 7, "type": "group" } }
            }
        }));
        assert_eq!(u.kind(), UpdateKind::CallbackQuery);
        let q = u.callback_query().unwrap();
        assert_eq!(q.message.message_id, MessageId(42));
        assert_eq!(q.message.chat_id, ChatId(7));
        assert_eq!(q.data, "yes");
        assert_eq!(q.from, Some(UserId(3)));
    }

    #[test]
    fn missing_paths_are_shape_errors() {
        let u = Update::new(json!({ "update_id": 1, "message": { "photo": [] } }));
        assert!(matches!(u.text(), Err(Error::Shape(_))));
        assert!(matches!(u.callback_query(), Err(Error::Shape(_))));
        assert!(matches!(
            Update::new(json!({ "update_id": "x" })).update_id(),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn batch_must_be_an_array() {
        assert_eq!(parse_batch(json!([{ "update_id": 1 }])).unwrap().len(), 1);
        assert!(parse_batch(Value::Null).unwrap().is_empty());
        assert!(matches!(parse_batch(json!({})), Err(Error::Shape(_))));
    }
}
