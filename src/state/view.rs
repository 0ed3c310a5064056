//! Which screen the user belongs on, derived from the combined state.

#[cfg(test)]
#[path = "view_test.rs"]
mod view_test;

use super::game::GameState;
use super::room::RoomState;
use super::user::UserState;
use crate::net::types::Phase;

/// Screen for the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// No signed-in user.
    Welcome,
    /// Signed in, browsing rooms.
    Lobby,
    /// Waiting in a room for the game to start.
    RoomLobby,
    Answering,
    Guessing,
    Finished,
}

impl View {
    /// A game session wins over a room, a room over the lobby.
    #[must_use]
    pub fn resolve(user: &UserState, room: &RoomState, game: &GameState) -> Self {
        if !user.is_authenticated() {
            return Self::Welcome;
        }
        if game.is_finished() {
            return Self::Finished;
        }
        match game.phase() {
            Some(Phase::Answering) => return Self::Answering,
            Some(Phase::Guessing) => return Self::Guessing,
            Some(Phase::Finished) => return Self::Finished,
            None => {}
        }
        if room.room.is_some() {
            Self::RoomLobby
        } else {
            Self::Lobby
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Lobby => "lobby",
            Self::RoomLobby => "room-lobby",
            Self::Answering => "answering",
            Self::Guessing => "guessing",
            Self::Finished => "finished",
        }
    }
}
