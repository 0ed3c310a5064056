//! Current-room state for the pre-game lobby.
//!
//! DESIGN
//! ======
//! The room is always the server's latest copy: every mutating call replaces it
//! with the record the server returns and persists that copy, so a restart lands
//! back in the same lobby. Leaving or clearing drops the persisted room too.

#[cfg(test)]
#[path = "room_test.rs"]
mod room_test;

use tracing::info;

use super::store::SessionStore;
use super::{StateError, persisted, track};
use crate::config::MIN_PLAYERS;
use crate::net::api::GameApi;
use crate::net::types::{Room, RoomConfigPatch, RoomOptions, RoomStatus};

/// Room the user is in, plus last error.
#[derive(Clone, Debug, Default)]
pub struct RoomState {
    pub room: Option<Room>,
    pub error: Option<String>,
}

impl RoomState {
    /// Load the persisted room, if any.
    #[must_use]
    pub fn restore(store: &SessionStore) -> Self {
        Self {
            room: store.room(),
            error: None,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|r| r.room_id.as_str())
    }

    #[must_use]
    pub fn is_host(&self, user_id: &str) -> bool {
        self.room.as_ref().is_some_and(|r| r.host_id == user_id)
    }

    /// Whether the lobby has enough players and has not started yet.
    #[must_use]
    pub fn can_start(&self) -> bool {
        self.room
            .as_ref()
            .is_some_and(|r| r.players.len() >= MIN_PLAYERS && r.status == RoomStatus::Waiting)
    }

    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server rejects the request.
    pub async fn create_room(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        user_id: &str,
        options: &RoomOptions,
    ) -> Result<&Room, StateError> {
        let result = api.create_room(user_id, options).await;
        let response = track(&mut self.error, "create room", result)?;
        info!(room_id = %response.room.room_id, "state: room created");
        Ok(self.adopt(store, response.room))
    }

    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server rejects the request.
    pub async fn join_room(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<&Room, StateError> {
        let result = api.join_room(room_id, user_id).await;
        let response = track(&mut self.error, "join room", result)?;
        info!(room_id, "state: joined room");
        Ok(self.adopt(store, response.room))
    }

    /// Leave the room server-side and forget it locally.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server rejects the request; the
    /// local room is kept in that case.
    pub async fn leave_room(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), StateError> {
        let result = api.leave_room(room_id, user_id).await;
        track(&mut self.error, "leave room", result)?;
        info!(room_id, "state: left room");
        self.clear(store);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server rejects the change.
    pub async fn update_config(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        room_id: &str,
        user_id: &str,
        patch: &RoomConfigPatch,
    ) -> Result<&Room, StateError> {
        let result = api.update_room_config(room_id, user_id, patch).await;
        let response = track(&mut self.error, "update room config", result)?;
        Ok(self.adopt(store, response.room))
    }

    /// Re-fetch the room from the server.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the fetch fails.
    pub async fn refresh(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        room_id: &str,
    ) -> Result<&Room, StateError> {
        let room = track(&mut self.error, "refresh room", api.get_room(room_id).await)?;
        Ok(self.adopt(store, room))
    }

    pub fn clear(&mut self, store: &SessionStore) {
        self.room = None;
        persisted("room removal", store.clear_room());
    }

    fn adopt(&mut self, store: &SessionStore, room: Room) -> &Room {
        persisted("room", store.set_room(&room));
        self.room.insert(room)
    }
}
