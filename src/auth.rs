//! Startup wiring and auth flows: resolve the backend, restore the session,
//! sign in and out, keep the stored profile current.

use crate::api::{
    ApiClient, ApiError, AuthResponse, ClientConfig, RegisterRequest, User, UserUpdate,
};
use crate::network::{self, Platform, ResolutionFailure, ResolvedEndpoint};
use crate::session::SessionStore;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("user not authenticated")]
    NotAuthenticated,
}

/// What app start resolved and restored, for display and logging.
#[derive(Debug)]
pub struct InitReport {
    pub endpoint: Option<ResolvedEndpoint>,
    pub resolution_failure: Option<ResolutionFailure>,
    pub restored_user: Option<User>,
}

pub struct AuthFlow {
    client: ApiClient,
    session: SessionStore,
}

impl AuthFlow {
    pub fn new(client: ApiClient) -> Self {
        let session = client.session().clone();
        AuthFlow { client, session }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// App-start sequence: resolve a live backend (falling back to the
    /// platform default URL when nothing answers), then restore any stored
    /// session. A half-written or unreadable session is discarded rather
    /// than restored.
    pub async fn initialize(&mut self, platform: Platform, host_hint: Option<&str>) -> InitReport {
        let http = self.client.http().clone();
        let (endpoint, resolution_failure) = match network::resolve(&http, platform, host_hint)
            .await
        {
            Ok(ep) => {
                self.client.reconfigure(ClientConfig::from_endpoint(&ep));
                (Some(ep), None)
            }
            Err(failure) => {
                log::warn!("{}; using platform default URL", failure);
                self.client
                    .reconfigure(ClientConfig::new(network::default_base_url(platform)));
                (None, Some(failure))
            }
        };

        let stored_user = match self.session.get_user() {
            Ok(user) => user,
            Err(e) => {
                log::error!("stored session unreadable ({}), clearing it", e);
                self.session.clear_session();
                None
            }
        };
        let restored_user = match (self.session.get_token(), stored_user) {
            (Some(_), Some(user)) => Some(user),
            _ => None,
        };

        InitReport {
            endpoint,
            resolution_failure,
            restored_user,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let auth = self.client.login(email.trim(), password.trim()).await?;
        self.persist(auth)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, AuthError> {
        let auth = self.client.register(request).await?;
        self.persist(auth)
    }

    fn persist(&self, auth: AuthResponse) -> Result<User, AuthError> {
        self.session.set_session(&auth.access_token, &auth.user)?;
        log::info!("signed in as {}", auth.user.email);
        Ok(auth.user)
    }

    /// Server-side invalidation is best-effort; the local session is always
    /// cleared.
    pub async fn logout(&self) {
        if self.session.get_token().is_some() {
            if let Err(e) = self.client.logout().await {
                log::warn!("server logout failed: {}", e);
            }
        }
        self.session.clear_session();
    }

    pub async fn update_user(&self, updates: &UserUpdate) -> Result<User, AuthError> {
        let current = self
            .session
            .get_user()?
            .ok_or(AuthError::NotAuthenticated)?;
        let user = self.client.update_user(&current.id, updates).await?;
        self.session.set_user(&user)?;
        Ok(user)
    }
}
