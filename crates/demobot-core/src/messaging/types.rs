use serde::Serialize;
use serde_json::{json, Value};

use crate::{errors::Error, Result};

/// Named arguments of one outbound command. Values may nest.
pub type ApiArgs = serde_json::Map<String, Value>;

/// Build [`ApiArgs`] from `(name, value)` pairs.
pub fn api_args<I, K>(pairs: I) -> ApiArgs
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Flatten arguments into form/query pairs.
///
/// Strings go out verbatim, other scalars via their JSON text, nested maps and
/// sequences as compact JSON. `null` arguments are omitted.
pub fn encode_args(args: &ApiArgs) -> Vec<(String, String)> {
    args.iter()
        .filter_map(|(k, v)| {
            let encoded = match v {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                Value::Bool(_) | Value::Number(_) => v.to_string(),
                Value::Array(_) | Value::Object(_) => v.to_string(),
            };
            Some((k.clone(), encoded))
        })
        .collect()
}

/// Raw answer of the remote API before `ok`/`result` unwrapping.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Convenience for a successful `{"ok": true, "result": ...}` answer.
    pub fn ok(result: Value) -> Self {
        Self::new(200, json!({ "ok": true, "result": result }))
    }

    /// Convenience for a failed `{"ok": false, "description": ...}` answer.
    pub fn failed(status: u16, description: &str) -> Self {
        Self::new(
            status,
            json!({ "ok": false, "error_code": status, "description": description }),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
            && self.body.get("ok").and_then(Value::as_bool) == Some(true)
    }

    /// Unwrap the `result` payload, or fail with [`Error::RemoteApi`].
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            let mut body = self.body;
            return Ok(body
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null));
        }

        let description = self
            .body
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {}", self.status));
        Err(Error::RemoteApi { description })
    }
}

/// Inline keyboard (buttons) attached to an interactive message.
#[derive(Clone, Debug)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InlineButton {
    #[serde(rename = "text")]
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    /// All buttons on a single row.
    pub fn single_row(buttons: Vec<InlineButton>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    /// `reply_markup` value for `sendMessage`.
    pub fn to_reply_markup(&self) -> Value {
        json!({ "inline_keyboard": self.rows })
    }
}
