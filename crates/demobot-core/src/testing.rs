//! Test doubles shared by the engine tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::{
    config::EngineConfig,
    engine::Engine,
    errors::Error,
    fault::{Fault, FaultReporter},
    messaging::{
        port::BotTransport,
        types::{ApiArgs, ApiResponse},
        update::Update,
    },
    Result,
};

#[derive(Default)]
struct ScriptState {
    batches: VecDeque<Result<ApiResponse>>,
    calls: Vec<(String, ApiArgs)>,
    failures: HashMap<String, String>,
    next_message_id: i64,
}

/// In-memory transport.
///
/// `getUpdates` pops scripted batches (idling briefly when none are queued);
/// every other command echoes its arguments back as a successful result.
pub(crate) struct ScriptedTransport {
    state: Mutex<ScriptState>,
    idle: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Self::with_idle_poll(Duration::from_millis(5))
    }

    /// Like [`ScriptedTransport::new`], but an empty `getUpdates` takes `idle`.
    pub fn with_idle_poll(idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ScriptState::default()),
            idle,
        })
    }

    pub fn push_batch(&self, batch: Value) {
        self.push_batch_response(ApiResponse::ok(batch));
    }

    pub fn push_batch_response(&self, resp: ApiResponse) {
        self.state.lock().unwrap().batches.push_back(Ok(resp));
    }

    pub fn push_error(&self, err: Error) {
        self.state.lock().unwrap().batches.push_back(Err(err));
    }

    pub fn fail_command(&self, command: &str, description: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(command.to_string(), description.to_string());
    }

    pub fn calls(&self) -> Vec<(String, ApiArgs)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn getupdates_offsets(&self) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter(|(c, _)| c == "getUpdates")
            .filter_map(|(_, args)| args.get("offset").and_then(Value::as_i64))
            .collect()
    }
}

#[async_trait]
impl BotTransport for ScriptedTransport {
    async fn call(&self, command: &str, args: &ApiArgs) -> Result<ApiResponse> {
        let scripted = {
            let mut st = self.state.lock().unwrap();
            st.calls.push((command.to_string(), args.clone()));

            if command == "getUpdates" {
                Some(st.batches.pop_front())
            } else if let Some(description) = st.failures.get(command) {
                return Ok(ApiResponse::failed(400, description));
            } else {
                st.next_message_id += 1;
                let chat = args.get("chat_id").cloned().unwrap_or(Value::Null);
                return Ok(ApiResponse::ok(json!({
                    "message_id": st.next_message_id,
                    "chat": { "id": chat },
                    "command": command,
                    "args": Value::Object(args.clone()),
                })));
            }
        };

        match scripted.flatten() {
            Some(next) => next,
            None => {
                tokio::time::sleep(self.idle).await;
                Ok(ApiResponse::ok(json!([])))
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingReporter {
    faults: Mutex<Vec<Fault>>,
}

impl RecordingReporter {
    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().unwrap().clone()
    }
}

impl FaultReporter for RecordingReporter {
    fn report(&self, fault: &Fault) {
        self.faults.lock().unwrap().push(fault.clone());
    }
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        bot_username: "BotName".to_string(),
        default_listener_timeout: Duration::from_secs(5),
        queue_poll_interval: Duration::from_millis(5),
        long_poll_timeout: Duration::ZERO,
        initial_offset: 0,
        allowed_updates: None,
    }
}

pub(crate) fn start_engine(transport: Arc<ScriptedTransport>) -> (Engine, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    let engine = Engine::start(test_config(), transport, reporter.clone());
    (engine, reporter)
}

pub(crate) fn text_update(update_id: i64, chat_id: i64, chat_type: &str, from: i64, text: &str) -> Update {
    Update::new(json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "text": text,
            "chat": { "id": chat_id, "type": chat_type },
            "from": { "id": from, "is_bot": false }
        }
    }))
}

pub(crate) fn callback_update(update_id: i64, chat_id: i64, message_id: i64, data: &str) -> Update {
    Update::new(json!({
        "update_id": update_id,
        "callback_query": {
            "id": format!("cb{update_id}"),
            "from": { "id": 1 },
            "data": data,
            "message": { "message_id": message_id, "chat": { "id": chat_id, "type": "group" } }
        }
    }))
}

pub(crate) async fn join_all(handles: Vec<JoinHandle<()>>) {
    for h in handles {
        h.await.unwrap();
    }
}

/// Poll `cond` until it holds; panics after two seconds.
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
