use async_trait::async_trait;

use crate::{
    messaging::types::{ApiArgs, ApiResponse},
    Result,
};

/// Port for the remote bot API.
///
/// One call is one HTTP-style round trip keyed by a command name. Implementations
/// return `Ok` for any response they could read (even `ok: false`); `Err` is
/// reserved for failures before a response exists (connect, timeout, decode).
#[async_trait]
pub trait BotTransport: Send + Sync {
    async fn call(&self, command: &str, args: &ApiArgs) -> Result<ApiResponse>;
}
