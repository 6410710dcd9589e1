//! Core of the demo bot: a long-poll update-dispatch engine.
//!
//! The engine is transport-agnostic. The HTTP client for the Bot API lives in
//! an adapter crate behind [`messaging::port::BotTransport`].

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod fault;
pub mod logging;
pub mod messaging;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
