//! Session persistence: access token + user profile, written both-or-neither.

use crate::api::User;
use crate::storage::{KeyValueStore, StoreError};
use std::sync::Arc;

pub const TOKEN_KEY: &str = "@auth_token";
pub const USER_KEY: &str = "@user_data";

/// Durable view of the logged-in state. Cheap to clone; all handles share
/// the same underlying store.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        SessionStore { store }
    }

    pub fn get_token(&self) -> Option<String> {
        self.store.get(TOKEN_KEY)
    }

    /// Malformed persisted JSON is the one storage condition that surfaces
    /// as a hard error; callers catch it at the access site.
    pub fn get_user(&self) -> Result<Option<User>, StoreError> {
        match self.store.get(USER_KEY) {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: USER_KEY.to_string(),
                    source: e,
                }),
            None => Ok(None),
        }
    }

    /// Token and user land in a single durable write.
    pub fn set_session(&self, token: &str, user: &User) -> Result<(), StoreError> {
        let raw = serde_json::to_string(user).map_err(|e| StoreError::Encode {
            key: USER_KEY.to_string(),
            source: e,
        })?;
        self.store.set_many(&[(TOKEN_KEY, token), (USER_KEY, &raw)]);
        Ok(())
    }

    /// Token-only update, used by the silent refresh path.
    pub fn set_token(&self, token: &str) {
        self.store.set(TOKEN_KEY, token);
    }

    /// Profile-only update, used after a successful profile edit.
    pub fn set_user(&self, user: &User) -> Result<(), StoreError> {
        let raw = serde_json::to_string(user).map_err(|e| StoreError::Encode {
            key: USER_KEY.to_string(),
            source: e,
        })?;
        self.store.set(USER_KEY, &raw);
        Ok(())
    }

    pub fn clear_session(&self) {
        self.store.remove_many(&[TOKEN_KEY, USER_KEY]);
    }

    /// Logged in means both halves are present; a lone token or lone profile
    /// counts as signed out.
    pub fn is_authenticated(&self) -> bool {
        self.get_token().is_some() && matches!(self.get_user(), Ok(Some(_)))
    }
}
