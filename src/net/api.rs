//! Typed game endpoints on top of the request gateway.
//!
//! Every method builds one `Call`, sends it through the shared `Gateway`, and
//! decodes the backend's response record. Ids interpolated into paths are
//! percent-encoded; bodies use the backend's field names.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use super::gateway::{ApiError, Call, Gateway};
use super::types::{
    Ack, FinishGameResponse, FinishGuessesResponse, GameSession, LeaveRoomResponse, NewQuestion,
    QuestionPage, QuestionResponse, RankingResponse, Room, RoomConfig, RoomConfigPatch, RoomOptions,
    RoomPage, RoomResponse, StartGameResponse, StartRoundResponse, TopicList, User, UserResponse,
};
use crate::config;

/// Default page size for question listings.
pub const QUESTION_PAGE_SIZE: u32 = 50;

fn user_path(user_id: &str) -> String {
    format!("/usuario/{}", urlencoding::encode(user_id))
}

fn room_path(room_id: &str, action: Option<&str>) -> String {
    let room = urlencoding::encode(room_id);
    match action {
        Some(action) => format!("/sala/{room}/{action}"),
        None => format!("/sala/{room}"),
    }
}

fn game_path(id: &str, action: &str) -> String {
    format!("/juego/{}/{action}", urlencoding::encode(id))
}

fn question_path(question_id: &str) -> String {
    format!("/pregunta/{}", urlencoding::encode(question_id))
}

fn topic_path(topic: &str) -> String {
    format!("/preguntas/topic/{}", urlencoding::encode(topic))
}

/// Body for `POST /sala/crear`, with unset options filled from game defaults.
fn create_room_body(user_id: &str, options: &RoomOptions) -> Value {
    let defaults = RoomConfig::default();
    let patch = &options.config;
    json!({
        "userId": user_id,
        "maxJugadores": options.max_players.unwrap_or(config::DEFAULT_MAX_PLAYERS),
        "numeroPreguntas": patch.question_count.unwrap_or(defaults.question_count),
        "tiempoRespuesta": patch.answer_time_secs.unwrap_or(defaults.answer_time_secs),
        "tiempoAdivinanza": patch.guess_time_secs.unwrap_or(defaults.guess_time_secs),
        "puntosAdivinanzaCorrecta": patch.points_per_guess.unwrap_or(defaults.points_per_guess),
        "topic": patch.topic.clone().unwrap_or(defaults.topic),
    })
}

/// Body for `PUT /sala/{id}/configuracion`: the user id merged with set fields only.
fn config_update_body(user_id: &str, patch: &RoomConfigPatch) -> Value {
    let mut body = match serde_json::to_value(patch) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    body.insert("userId".to_owned(), Value::String(user_id.to_owned()));
    Value::Object(body)
}

fn paged(call: Call, limit: u32, last_key: Option<&str>) -> Call {
    let call = call.query("limit", limit);
    match last_key {
        Some(key) => call.query("lastKey", key),
        None => call,
    }
}

/// Profile fields a user may change; `None` leaves the field as is.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct UserUpdate {
    #[serde(rename = "nombre", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "avatarUrl", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Game backend API.
#[derive(Clone, Debug)]
pub struct GameApi {
    gateway: Gateway,
}

impl GameApi {
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    // =========================================================================
    // USERS
    // =========================================================================

    /// `POST /usuario/crear`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn create_user(&self, name: &str) -> Result<UserResponse, ApiError> {
        let call = Call::post("/usuario/crear").json(json!({ "nombre": name }));
        self.gateway.send(&call).await
    }

    /// `GET /usuario/{id}`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        self.gateway.send(&Call::get(user_path(user_id))).await
    }

    /// `PUT /usuario/{id}`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<UserResponse, ApiError> {
        let body = serde_json::to_value(update).map_err(ApiError::Shape)?;
        self.gateway
            .send(&Call::put(user_path(user_id)).json(body))
            .await
    }

    // =========================================================================
    // ROOMS
    // =========================================================================

    /// `POST /sala/crear`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn create_room(
        &self,
        user_id: &str,
        options: &RoomOptions,
    ) -> Result<RoomResponse, ApiError> {
        let call = Call::post("/sala/crear").json(create_room_body(user_id, options));
        self.gateway.send(&call).await
    }

    /// `POST /sala/{id}/unirse`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn join_room(&self, room_id: &str, user_id: &str) -> Result<RoomResponse, ApiError> {
        let call =
            Call::post(room_path(room_id, Some("unirse"))).json(json!({ "userId": user_id }));
        self.gateway.send(&call).await
    }

    /// `POST /sala/{id}/salir`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn leave_room(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<LeaveRoomResponse, ApiError> {
        let call = Call::post(room_path(room_id, Some("salir"))).json(json!({ "userId": user_id }));
        self.gateway.send(&call).await
    }

    /// `GET /sala/{id}`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn get_room(&self, room_id: &str) -> Result<Room, ApiError> {
        self.gateway.send(&Call::get(room_path(room_id, None))).await
    }

    /// `GET /salas/disponibles?limit=&lastKey=`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn list_rooms(
        &self,
        limit: u32,
        last_key: Option<&str>,
    ) -> Result<RoomPage, ApiError> {
        let call = paged(Call::get("/salas/disponibles"), limit, last_key);
        self.gateway.send(&call).await
    }

    /// `PUT /sala/{id}/configuracion`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn update_room_config(
        &self,
        room_id: &str,
        user_id: &str,
        patch: &RoomConfigPatch,
    ) -> Result<RoomResponse, ApiError> {
        let call = Call::put(room_path(room_id, Some("configuracion")))
            .json(config_update_body(user_id, patch));
        self.gateway.send(&call).await
    }

    // =========================================================================
    // QUESTIONS
    // =========================================================================

    /// `POST /pregunta/crear`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn create_question(
        &self,
        question: &NewQuestion,
    ) -> Result<QuestionResponse, ApiError> {
        let body = serde_json::to_value(question).map_err(ApiError::Shape)?;
        self.gateway
            .send(&Call::post("/pregunta/crear").json(body))
            .await
    }

    /// `GET /preguntas?limit=&lastKey=`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn list_questions(
        &self,
        limit: u32,
        last_key: Option<&str>,
    ) -> Result<QuestionPage, ApiError> {
        self.gateway
            .send(&paged(Call::get("/preguntas"), limit, last_key))
            .await
    }

    /// `GET /preguntas/topic/{topic}?limit=`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn list_questions_by_topic(
        &self,
        topic: &str,
        limit: u32,
    ) -> Result<QuestionPage, ApiError> {
        let call = Call::get(topic_path(topic)).query("limit", limit);
        self.gateway.send(&call).await
    }

    /// `GET /preguntas/topics`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn list_topics(&self) -> Result<TopicList, ApiError> {
        self.gateway.send(&Call::get("/preguntas/topics")).await
    }

    /// `DELETE /pregunta/{id}`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn delete_question(&self, question_id: &str) -> Result<Ack, ApiError> {
        self.gateway
            .send(&Call::delete(question_path(question_id)))
            .await
    }

    // =========================================================================
    // GAME
    // =========================================================================

    /// `POST /juego/{room}/iniciar`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn start_game(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<StartGameResponse, ApiError> {
        let call = Call::post(game_path(room_id, "iniciar")).json(json!({ "userId": user_id }));
        self.gateway.send(&call).await
    }

    /// `POST /juego/{session}/ronda`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn start_round(&self, session_id: &str) -> Result<StartRoundResponse, ApiError> {
        self.gateway
            .send(&Call::post(game_path(session_id, "ronda")))
            .await
    }

    /// `POST /juego/{session}/responder`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn submit_answer(
        &self,
        session_id: &str,
        user_id: &str,
        answer: &str,
    ) -> Result<Ack, ApiError> {
        let call = Call::post(game_path(session_id, "responder"))
            .json(json!({ "userId": user_id, "respuesta": answer }));
        self.gateway.send(&call).await
    }

    /// `POST /juego/{session}/fase-respuestas/finalizar`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn finish_answer_phase(&self, session_id: &str) -> Result<Ack, ApiError> {
        self.gateway
            .send(&Call::post(game_path(session_id, "fase-respuestas/finalizar")))
            .await
    }

    /// `POST /juego/{session}/adivinar`. `guesses` maps player id to guessed answer.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn submit_guesses(
        &self,
        session_id: &str,
        user_id: &str,
        guesses: &HashMap<String, String>,
    ) -> Result<Ack, ApiError> {
        let call = Call::post(game_path(session_id, "adivinar"))
            .json(json!({ "userId": user_id, "adivinanzas": guesses }));
        self.gateway.send(&call).await
    }

    /// `POST /juego/{session}/fase-adivinanzas/finalizar`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn finish_guess_phase(
        &self,
        session_id: &str,
    ) -> Result<FinishGuessesResponse, ApiError> {
        self.gateway
            .send(&Call::post(game_path(session_id, "fase-adivinanzas/finalizar")))
            .await
    }

    /// `GET /juego/{session}/estado`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn game_state(&self, session_id: &str) -> Result<GameSession, ApiError> {
        self.gateway
            .send(&Call::get(game_path(session_id, "estado")))
            .await
    }

    /// `POST /juego/{session}/finalizar`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn finish_game(&self, session_id: &str) -> Result<FinishGameResponse, ApiError> {
        self.gateway
            .send(&Call::post(game_path(session_id, "finalizar")))
            .await
    }

    /// `GET /juego/{session}/ranking`.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ApiError`].
    pub async fn game_ranking(&self, session_id: &str) -> Result<RankingResponse, ApiError> {
        self.gateway
            .send(&Call::get(game_path(session_id, "ranking")))
            .await
    }
}
