//! Networking modules for the REST gateway and the websocket event stream.
//!
//! SYSTEM CONTEXT
//! ==============
//! `gateway` runs JSON calls with timeout and retry, `api` maps game endpoints
//! onto it, `event_client` manages the reconnecting websocket, `envelope`
//! defines its message framing, and `types` holds the shared wire records.

pub mod api;
pub mod envelope;
pub mod event_client;
pub mod gateway;
pub mod types;
