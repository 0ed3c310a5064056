//! Wire types mirroring the backend's JSON records.
//!
//! DESIGN
//! ======
//! Records are server-owned: the client decodes, displays, and re-submits them by
//! id. Field names on the wire are the backend's own; Rust names are translated
//! via `serde(rename)`. Unknown fields are ignored and optional fields default so
//! additive backend changes do not break decoding.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config;

/// A player identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: String,
}

/// Lifecycle of a room as reported by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    #[serde(rename = "esperando")]
    Waiting,
    #[serde(rename = "jugando")]
    Playing,
    #[serde(rename = "finalizado")]
    Finished,
}

/// Per-room game settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    #[serde(rename = "numeroPreguntas")]
    pub question_count: u32,
    #[serde(rename = "tiempoRespuesta")]
    pub answer_time_secs: u32,
    #[serde(rename = "tiempoAdivinanza")]
    pub guess_time_secs: u32,
    #[serde(rename = "puntosAdivinanzaCorrecta")]
    pub points_per_guess: u32,
    pub topic: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            question_count: config::DEFAULT_QUESTIONS,
            answer_time_secs: config::DEFAULT_RESPONSE_TIME_SECS,
            guess_time_secs: config::DEFAULT_GUESS_TIME_SECS,
            points_per_guess: config::DEFAULT_POINTS,
            topic: config::DEFAULT_TOPIC.to_owned(),
        }
    }
}

/// Partial room config for updates; `None` fields are left untouched server-side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfigPatch {
    #[serde(rename = "numeroPreguntas", skip_serializing_if = "Option::is_none")]
    pub question_count: Option<u32>,
    #[serde(rename = "tiempoRespuesta", skip_serializing_if = "Option::is_none")]
    pub answer_time_secs: Option<u32>,
    #[serde(rename = "tiempoAdivinanza", skip_serializing_if = "Option::is_none")]
    pub guess_time_secs: Option<u32>,
    #[serde(rename = "puntosAdivinanzaCorrecta", skip_serializing_if = "Option::is_none")]
    pub points_per_guess: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Options for creating a room. Missing values use the game defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoomOptions {
    pub max_players: Option<u32>,
    pub config: RoomConfigPatch,
}

/// A joinable group of players.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "hostId")]
    pub host_id: String,
    #[serde(rename = "jugadores", default)]
    pub players: Vec<User>,
    #[serde(rename = "maxJugadores")]
    pub max_players: u32,
    #[serde(rename = "estado")]
    pub status: RoomStatus,
    #[serde(rename = "configuracion")]
    pub config: RoomConfig,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: String,
}

/// A trivia question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "opciones", default)]
    pub options: Vec<String>,
    pub topic: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
}

/// Body for creating a question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewQuestion {
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "opciones")]
    pub options: Vec<String>,
    pub topic: String,
}

/// Server-reported round phase.
///
/// The client maps this to a view; it never derives or advances it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "respuestas")]
    Answering,
    #[serde(rename = "adivinanzas")]
    Guessing,
    #[serde(rename = "finalizada")]
    Finished,
}

impl Phase {
    /// Wire tag for this phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answering => "respuestas",
            Self::Guessing => "adivinanzas",
            Self::Finished => "finalizada",
        }
    }
}

/// Run status of a game session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "activa")]
    Active,
    #[serde(rename = "finalizada")]
    Finished,
}

/// A player's view inside a running game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePlayer {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: String,
    #[serde(rename = "puntuacion", default)]
    pub score: i64,
    #[serde(rename = "respuesta", default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(rename = "adivinanzas", default, skip_serializing_if = "Option::is_none")]
    pub guesses: Option<HashMap<String, String>>,
}

/// An active (or finished) game run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "estado")]
    pub status: SessionStatus,
    #[serde(rename = "rondaActual", default)]
    pub current_round: u32,
    #[serde(rename = "fase")]
    pub phase: Phase,
    #[serde(rename = "preguntaActual", default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<Question>,
    #[serde(rename = "jugadores", default)]
    pub players: Vec<GamePlayer>,
    #[serde(rename = "configuracion")]
    pub config: RoomConfig,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: String,
}

/// One row of a scoreboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: String,
    #[serde(rename = "puntuacion", default)]
    pub score: i64,
    #[serde(rename = "posicion", default)]
    pub position: u32,
}

/// Per-player outcome of a finished round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "aciertos", default)]
    pub correct_guesses: u32,
    #[serde(rename = "puntosGanados", default)]
    pub points_earned: i64,
}

// =============================================================================
// RESPONSE ENVELOPES
// =============================================================================

/// Acknowledgement-only response (`mensaje` or `message`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(alias = "mensaje", default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UserResponse {
    #[serde(alias = "mensaje", default)]
    pub message: String,
    #[serde(rename = "usuario")]
    pub user: User,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RoomResponse {
    #[serde(alias = "mensaje", default)]
    pub message: String,
    #[serde(rename = "sala")]
    pub room: Room,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LeaveRoomResponse {
    #[serde(rename = "mensaje", alias = "message", default)]
    pub message: String,
    #[serde(rename = "sala", default)]
    pub room: Option<Room>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RoomPage {
    #[serde(rename = "salas", default)]
    pub rooms: Vec<Room>,
    #[serde(rename = "lastKey", default)]
    pub last_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct QuestionResponse {
    #[serde(alias = "mensaje", default)]
    pub message: String,
    #[serde(rename = "pregunta")]
    pub question: Question,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct QuestionPage {
    #[serde(rename = "preguntas", default)]
    pub questions: Vec<Question>,
    #[serde(rename = "lastKey", default)]
    pub last_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TopicList {
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StartGameResponse {
    #[serde(alias = "mensaje", default)]
    pub message: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "sesion")]
    pub session: GameSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StartRoundResponse {
    #[serde(rename = "mensaje", alias = "message", default)]
    pub message: String,
    #[serde(rename = "ronda")]
    pub round: u32,
    #[serde(rename = "pregunta")]
    pub question: Question,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FinishGuessesResponse {
    #[serde(rename = "mensaje", alias = "message", default)]
    pub message: String,
    #[serde(rename = "resultados", default)]
    pub results: Vec<RoundResult>,
    #[serde(default)]
    pub ranking: Vec<RankingEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FinishGameResponse {
    #[serde(rename = "mensaje", alias = "message", default)]
    pub message: String,
    #[serde(rename = "ganador")]
    pub winner: RankingEntry,
    #[serde(rename = "rankingFinal", default)]
    pub final_ranking: Vec<RankingEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RankingResponse {
    #[serde(default)]
    pub ranking: Vec<RankingEntry>,
}
