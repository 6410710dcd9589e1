/// Core error type for the bot engine.
///
/// Adapter crates map their specific errors into this type so the engine can
/// tell caller-visible failures (remote/config) from locally swallowed ones
/// (event shape mismatches).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("remote api error: {description}")]
    RemoteApi { description: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected update shape: {0}")]
    Shape(String),

    #[error("listener error: {0}")]
    Listener(String),

    #[error("engine worker is not running")]
    EngineStopped,

    #[error("engine worker failed: {0}")]
    WorkerFailed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn shape(what: impl Into<String>) -> Self {
        Error::Shape(what.into())
    }

    pub fn listener(msg: impl std::fmt::Display) -> Self {
        Error::Listener(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
