//! Client library for the bluff trivia game backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! `net` talks to the backend: a retrying JSON gateway for request/response
//! calls and a reconnecting websocket client for push events. `state` keeps
//! the client's view of the user, room, and game, persisting the parts that
//! must survive a restart. `config` holds connection settings and game limits.

pub mod config;
pub mod net;
pub mod state;
