//! Running-game state: session, question, round results, and rankings.
//!
//! DESIGN
//! ======
//! The phase and round counter are read from the server's session record and
//! never advanced locally. Phase-changing calls only report acknowledgement; the
//! new phase shows up on the next `refresh`, which push events trigger.
//!
//! Only the session id is persisted. On restore the session itself is fetched
//! again, so a stale local copy never drives the view.

#[cfg(test)]
#[path = "game_test.rs"]
mod game_test;

use std::collections::HashMap;

use tracing::{info, warn};

use super::store::SessionStore;
use super::{StateError, persisted, track};
use crate::net::api::GameApi;
use crate::net::types::{GameSession, Phase, Question, RankingEntry, RoundResult, SessionStatus};

/// Game session view model.
#[derive(Clone, Debug, Default)]
pub struct GameState {
    pub session: Option<GameSession>,
    pub current_question: Option<Question>,
    pub ranking: Vec<RankingEntry>,
    pub round_results: Vec<RoundResult>,
    pub winner: Option<RankingEntry>,
    pub error: Option<String>,
}

impl GameState {
    /// Resume the persisted session, if any. A failed fetch leaves the state
    /// empty with `error` set.
    pub async fn restore(api: &GameApi, store: &SessionStore) -> Self {
        let mut state = Self::default();
        if let Some(session_id) = store.session_id() {
            if let Err(e) = state.refresh(api, &session_id).await {
                warn!(%session_id, error = %e, "state: could not resume game session");
            }
        }
        state
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.session.as_ref().map(|s| s.phase)
    }

    #[must_use]
    pub fn is_answer_phase(&self) -> bool {
        self.phase() == Some(Phase::Answering)
    }

    #[must_use]
    pub fn is_guess_phase(&self) -> bool {
        self.phase() == Some(Phase::Guessing)
    }

    /// Finished by phase tag or by session status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.phase == Phase::Finished || s.status == SessionStatus::Finished)
    }

    #[must_use]
    pub fn current_round(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.current_round)
    }

    #[must_use]
    pub fn total_rounds(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.config.question_count)
    }

    /// Start a game in `room_id` and remember its session id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server refuses to start.
    pub async fn start_game(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<String, StateError> {
        let result = api.start_game(room_id, user_id).await;
        let response = track(&mut self.error, "start game", result)?;
        info!(session_id = %response.session_id, room_id, "state: game started");
        persisted("session id", store.set_session_id(&response.session_id));
        self.session = Some(response.session);
        Ok(response.session_id)
    }

    /// Follow a session another player started.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the session cannot be fetched.
    pub async fn adopt_session(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        session_id: &str,
    ) -> Result<(), StateError> {
        persisted("session id", store.set_session_id(session_id));
        self.refresh(api, session_id).await
    }

    /// Open the next round. Returns the round number.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server refuses.
    pub async fn start_round(
        &mut self,
        api: &GameApi,
        session_id: &str,
    ) -> Result<u32, StateError> {
        let result = api.start_round(session_id).await;
        let response = track(&mut self.error, "start round", result)?;
        info!(session_id, round = response.round, "state: round started");
        self.current_question = Some(response.question);
        self.round_results.clear();
        Ok(response.round)
    }

    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the answer is rejected.
    pub async fn submit_answer(
        &mut self,
        api: &GameApi,
        session_id: &str,
        user_id: &str,
        answer: &str,
    ) -> Result<(), StateError> {
        let result = api.submit_answer(session_id, user_id, answer).await;
        track(&mut self.error, "submit answer", result)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server refuses.
    pub async fn finish_answer_phase(
        &mut self,
        api: &GameApi,
        session_id: &str,
    ) -> Result<(), StateError> {
        let result = api.finish_answer_phase(session_id).await;
        track(&mut self.error, "finish answer phase", result)?;
        Ok(())
    }

    /// `guesses` maps each other player's id to the answer guessed for them.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the guesses are rejected.
    pub async fn submit_guesses(
        &mut self,
        api: &GameApi,
        session_id: &str,
        user_id: &str,
        guesses: &HashMap<String, String>,
    ) -> Result<(), StateError> {
        let result = api.submit_guesses(session_id, user_id, guesses).await;
        track(&mut self.error, "submit guesses", result)?;
        Ok(())
    }

    /// Close guessing and take the round results and updated ranking.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server refuses.
    pub async fn finish_guess_phase(
        &mut self,
        api: &GameApi,
        session_id: &str,
    ) -> Result<&[RoundResult], StateError> {
        let result = api.finish_guess_phase(session_id).await;
        let response = track(&mut self.error, "finish guess phase", result)?;
        self.round_results = response.results;
        self.ranking = response.ranking;
        Ok(&self.round_results)
    }

    /// End the game and take the final ranking.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server refuses.
    pub async fn finish_game(
        &mut self,
        api: &GameApi,
        session_id: &str,
    ) -> Result<&RankingEntry, StateError> {
        let result = api.finish_game(session_id).await;
        let response = track(&mut self.error, "finish game", result)?;
        info!(session_id, winner = %response.winner.name, "state: game finished");
        self.ranking = response.final_ranking;
        Ok(self.winner.insert(response.winner))
    }

    /// Re-fetch the session, then its ranking.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if either fetch fails. A session fetched
    /// before a failed ranking fetch is kept.
    pub async fn refresh(&mut self, api: &GameApi, session_id: &str) -> Result<(), StateError> {
        let session = track(&mut self.error, "refresh game", api.game_state(session_id).await)?;
        if let Some(question) = &session.current_question {
            self.current_question = Some(question.clone());
        }
        self.session = Some(session);

        let ranking = track(
            &mut self.error,
            "refresh ranking",
            api.game_ranking(session_id).await,
        )?;
        self.ranking = ranking.ranking;
        Ok(())
    }

    /// Drop all game state and the persisted session id.
    pub fn clear(&mut self, store: &SessionStore) {
        *self = Self::default();
        persisted("session removal", store.clear_session());
    }
}
