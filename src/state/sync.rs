//! Applying server push events to the room and game controllers.
//!
//! Push events carry no authoritative state; they only say what to re-fetch.
//! `gameStarted` with a session id switches the client onto that session.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use tracing::debug;

use super::StateError;
use super::game::GameState;
use super::room::RoomState;
use super::store::SessionStore;
use crate::net::api::GameApi;
use crate::net::envelope::ServerEvent;

/// What a push event changed locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Room,
    Game,
    Nothing,
}

/// Re-fetch whatever `event` invalidated.
///
/// # Errors
///
/// Returns [`StateError::Api`] if the re-fetch fails.
pub async fn apply_event(
    event: &ServerEvent,
    api: &GameApi,
    store: &SessionStore,
    room: &mut RoomState,
    game: &mut GameState,
) -> Result<Applied, StateError> {
    if let ServerEvent::GameStarted {
        session_id: Some(session_id),
    } = event
    {
        if game.session_id() != Some(session_id.as_str()) {
            game.adopt_session(api, store, session_id).await?;
            return Ok(Applied::Game);
        }
    }

    if event.refreshes_room() {
        if let Some(room_id) = room.room_id().map(ToOwned::to_owned) {
            room.refresh(api, store, &room_id).await?;
            return Ok(Applied::Room);
        }
    } else if event.refreshes_game() {
        if let Some(session_id) = game.session_id().map(ToOwned::to_owned) {
            game.refresh(api, &session_id).await?;
            return Ok(Applied::Game);
        }
    }

    debug!(?event, "sync: nothing to refresh");
    Ok(Applied::Nothing)
}
