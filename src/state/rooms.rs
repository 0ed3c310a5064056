//! Paginated list of joinable rooms.
//!
//! `refresh` restarts from the first page and replaces the list; `load_more`
//! follows the server's `lastKey` cursor and appends. A page without `lastKey`
//! is the last one.

#[cfg(test)]
#[path = "rooms_test.rs"]
mod rooms_test;

use std::time::Duration;

use tracing::debug;

use super::{StateError, track};
use crate::net::api::GameApi;
use crate::net::types::Room;

pub const ROOM_PAGE_SIZE: u32 = 20;
pub const AUTO_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Available rooms with the pagination cursor.
#[derive(Clone, Debug)]
pub struct RoomListState {
    pub rooms: Vec<Room>,
    pub error: Option<String>,
    last_key: Option<String>,
    has_more: bool,
}

impl Default for RoomListState {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            error: None,
            last_key: None,
            has_more: true,
        }
    }
}

impl RoomListState {
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Periodic refresh pauses while the last load failed.
    #[must_use]
    pub fn should_auto_refresh(&self) -> bool {
        self.error.is_none()
    }

    /// Reload the first page, replacing the current list.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the listing fails; the list is unchanged.
    pub async fn refresh(&mut self, api: &GameApi) -> Result<&[Room], StateError> {
        let result = api.list_rooms(ROOM_PAGE_SIZE, None).await;
        let page = track(&mut self.error, "list rooms", result)?;
        debug!(count = page.rooms.len(), "state: rooms loaded");
        self.rooms = page.rooms;
        self.has_more = page.last_key.is_some();
        self.last_key = page.last_key;
        Ok(&self.rooms)
    }

    /// Append the next page. Does nothing once the last page was reached.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the listing fails; the list is unchanged.
    pub async fn load_more(&mut self, api: &GameApi) -> Result<&[Room], StateError> {
        if !self.has_more {
            return Ok(&self.rooms);
        }
        let result = api.list_rooms(ROOM_PAGE_SIZE, self.last_key.as_deref()).await;
        let page = track(&mut self.error, "list more rooms", result)?;
        debug!(count = page.rooms.len(), "state: more rooms loaded");
        self.rooms.extend(page.rooms);
        self.has_more = page.last_key.is_some();
        self.last_key = page.last_key;
        Ok(&self.rooms)
    }
}
