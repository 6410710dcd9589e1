//! Telegram Bot API transport (reqwest).
//!
//! This crate implements the `demobot-core` BotTransport over HTTPS form posts.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use demobot_core::{
    config::Config,
    errors::Error,
    messaging::{
        port::BotTransport,
        types::{encode_args, ApiArgs, ApiResponse},
    },
    Result,
};

#[derive(Clone)]
pub struct HttpTransport {
    base: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("http client build error: {e}")))?;
        Ok(Self {
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
            http,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.telegram_api_url, &cfg.telegram_bot_token, cfg.http_timeout)
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/{command}", self.base)
    }
}

#[async_trait]
impl BotTransport for HttpTransport {
    async fn call(&self, command: &str, args: &ApiArgs) -> Result<ApiResponse> {
        let resp = self
            .http
            .post(self.endpoint(command))
            .form(&encode_args(args))
            .send()
            .await
            // Drop the URL: it carries the bot token.
            .map_err(|e| Error::Transport(format!("{command}: {}", e.without_url())))?;

        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("{command}: reading body: {}", e.without_url())))?;

        // Proxies answer errors with HTML; keep the status and let the caller decide.
        let body = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);
        tracing::trace!(command, status, "bot api call finished");
        Ok(ApiResponse::new(status, body))
    }
}
