//! Signed-in user state.
//!
//! The user record is created server-side and cached in the session store, so a
//! restart restores the identity without a network call.

#[cfg(test)]
#[path = "user_test.rs"]
mod user_test;

use tracing::info;

use super::store::SessionStore;
use super::{StateError, persisted, track};
use crate::net::api::{GameApi, UserUpdate};
use crate::net::types::User;

/// Current user and last error.
#[derive(Clone, Debug, Default)]
pub struct UserState {
    pub user: Option<User>,
    pub error: Option<String>,
}

impl UserState {
    /// Load the persisted user, if any.
    #[must_use]
    pub fn restore(store: &SessionStore) -> Self {
        Self {
            user: store.user(),
            error: None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.user_id.as_str())
    }

    /// Register a new user and make it the signed-in identity.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Api`] if the server rejects the request.
    pub async fn create_user(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        name: &str,
    ) -> Result<&User, StateError> {
        let response = track(&mut self.error, "create user", api.create_user(name).await)?;
        info!(user_id = %response.user.user_id, "state: user created");
        persisted("user", store.set_user(&response.user));
        Ok(self.user.insert(response.user))
    }

    /// Change the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotSignedIn`] without a user, or
    /// [`StateError::Api`] if the server rejects the change.
    pub async fn update_user(
        &mut self,
        api: &GameApi,
        store: &SessionStore,
        update: &UserUpdate,
    ) -> Result<&User, StateError> {
        let Some(user_id) = self.user_id().map(ToOwned::to_owned) else {
            self.error = Some(StateError::NotSignedIn.to_string());
            return Err(StateError::NotSignedIn);
        };
        let result = api.update_user(&user_id, update).await;
        let response = track(&mut self.error, "update user", result)?;
        persisted("user", store.set_user(&response.user));
        Ok(self.user.insert(response.user))
    }

    /// Forget the user and everything tied to it.
    pub fn logout(&mut self, store: &SessionStore) {
        persisted("logout", store.clear_all());
        self.user = None;
        self.error = None;
        info!("state: signed out");
    }
}
