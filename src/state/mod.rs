//! Client-side state controllers and local persistence.
//!
//! SYSTEM CONTEXT
//! ==============
//! Each controller holds the last server-confirmed value for one concern plus
//! the last error message. Operations take the `GameApi` and `SessionStore`
//! explicitly, so the same controller works under the CLI and in tests.
//! `sync` turns server push events into re-fetches, and `view` maps the
//! combined state to the screen the user should be on.

pub mod game;
pub mod room;
pub mod rooms;
pub mod store;
pub mod sync;
pub mod user;
pub mod view;

#[cfg(test)]
mod testkit;

use tracing::warn;

use crate::net::gateway::ApiError;
use store::StoreError;

/// Error type for state controller operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no signed-in user")]
    NotSignedIn,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Record an API outcome on a controller's `error` slot.
fn track<T>(
    error: &mut Option<String>,
    what: &str,
    result: Result<T, ApiError>,
) -> Result<T, StateError> {
    match result {
        Ok(value) => {
            *error = None;
            Ok(value)
        }
        Err(e) => {
            warn!(error = %e, "state: {what} failed");
            *error = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// Persistence failures do not undo a server-confirmed change; they are logged.
fn persisted(what: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        warn!(error = %e, "store: failed to persist {what}");
    }
}
