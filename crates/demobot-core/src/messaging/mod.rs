//! Wire-level abstractions: the transport port, request/response types and the
//! inbound update model.

pub mod port;
pub mod types;
pub mod update;
