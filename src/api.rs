//! HTTP client for the NutriChat backend API: JSON requests, bearer auth,
//! and a one-shot token-refresh-and-retry on 401.

use crate::network::ResolvedEndpoint;
use crate::session::SessionStore;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Typed failure at the client boundary. Transport and body problems never
/// escape as raw reqwest errors; callers branch on the variant.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response body: {0}")]
    Body(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,
    pub id: String,
    pub fullname: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(rename = "fromAI")]
    pub from_ai: bool,
    /// RFC 3339 timestamp as sent by the backend.
    pub timestamp: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChat {
    pub chat_id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub first_message: Option<ChatMessage>,
    #[serde(default)]
    pub first_message_time: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub chat_id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GeneratedText {
    pub text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegisterRequest {
    pub fullname: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

/// Partial profile update; absent fields are left untouched server-side.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// Outgoing chat message. A missing `chat_id` asks the backend to create
/// the chat alongside the message.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(rename = "fromAI")]
    pub from_ai: bool,
}

/// Explicit client configuration; re-resolution feeds a new one in through
/// `ApiClient::reconfigure` instead of mutating ambient state.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_endpoint(endpoint: &ResolvedEndpoint) -> Self {
        Self::new(endpoint.base_url.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    http: reqwest::Client,
    session: SessionStore,
}

fn network_error(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

/// Server-provided `{error|message}` JSON field, else the raw body text,
/// else a generic `HTTP <status>` string.
fn error_message(status: u16, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        let field = v
            .get("error")
            .and_then(Value::as_str)
            .or_else(|| v.get("message").and_then(Value::as_str));
        if let Some(msg) = field {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}

/// Login and refresh must never trigger the refresh path themselves.
fn is_auth_path(path: &str) -> bool {
    path.contains("/auth/refresh") || path.contains("/auth/login")
}

fn to_body<B: Serialize>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(|e| ApiError::Body(e.to_string()))
}

impl ApiClient {
    pub fn new(config: ClientConfig, session: SessionStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("http client");
        ApiClient {
            config,
            http,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url()
    }

    /// Shared handle to the underlying transport, e.g. for probing.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Point the client at a newly resolved endpoint.
    pub fn reconfigure(&mut self, config: ClientConfig) {
        log::info!("API base URL set to {}", config.base_url());
        self.config = config;
    }

    /// Shared request primitive. At most one silent refresh-and-retry per
    /// call: the `refreshed` flag bounds the loop to two sends.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ApiResult<T> {
        let url = format!("{}{}", self.config.base_url(), path);
        let mut token = self.session.get_token();
        let mut refreshed = false;
        loop {
            log::debug!("API request: {} {}", method, url);
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header(reqwest::header::CONTENT_TYPE, "application/json");
            if let Some(t) = &token {
                req = req.bearer_auth(t);
            }
            if let Some(b) = &body {
                req = req.json(b);
            }
            let response = req.send().await.map_err(network_error)?;
            let status = response.status();

            if status.as_u16() == 204 {
                return serde_json::from_value(Value::Null)
                    .map_err(|e| ApiError::Body(e.to_string()));
            }
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|e| ApiError::Body(e.to_string()));
            }

            let code = status.as_u16();
            let text = response.text().await.unwrap_or_default();
            let failure = ApiError::Http {
                status: code,
                message: error_message(code, &text),
            };
            log::warn!("API error: {} {} -> {}", method, url, failure);

            if code == 401 && !refreshed && !is_auth_path(path) {
                log::info!("access token rejected, attempting refresh");
                // Boxed: refresh goes back through `request`, and an async fn
                // cannot contain its own future by value.
                match Box::pin(self.refresh_token()).await {
                    Ok(r) => {
                        self.session.set_token(&r.access_token);
                        token = Some(r.access_token);
                        refreshed = true;
                        continue;
                    }
                    Err(e) => {
                        // Refresh-401 and refresh-unreachable collapse into
                        // one "refresh failed"; the original 401 is returned.
                        log::warn!("token refresh failed: {}", e);
                        return Err(failure);
                    }
                }
            }
            return Err(failure);
        }
    }

    // Auth endpoints

    pub async fn register(&self, request: &RegisterRequest) -> ApiResult<AuthResponse> {
        self.request(Method::POST, "/auth/register", Some(to_body(request)?))
            .await
    }

    pub async fn login(&self, email: &str, password: &str) -> ApiResult<AuthResponse> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.request(Method::POST, "/auth/login", Some(body)).await
    }

    /// Exchange the current (possibly expiring) token for a fresh one.
    pub async fn refresh_token(&self) -> ApiResult<RefreshResponse> {
        self.request(Method::POST, "/auth/refresh", None).await
    }

    pub async fn logout(&self) -> ApiResult<Value> {
        self.request(Method::POST, "/auth/logout", None).await
    }

    // User endpoints

    pub async fn get_user(&self, user_id: &str) -> ApiResult<User> {
        let path = format!("/users/{}", urlencoding::encode(user_id));
        self.request(Method::GET, &path, None).await
    }

    pub async fn update_user(&self, user_id: &str, updates: &UserUpdate) -> ApiResult<User> {
        let path = format!("/users/{}", urlencoding::encode(user_id));
        self.request(Method::PUT, &path, Some(to_body(updates)?))
            .await
    }

    // Chat endpoints

    pub async fn get_recent_chats(&self) -> ApiResult<Vec<RecentChat>> {
        self.request(Method::GET, "/chats/recent", None).await
    }

    pub async fn create_chat(&self, chat: &NewChat) -> ApiResult<Chat> {
        self.request(Method::POST, "/chats", Some(to_body(chat)?))
            .await
    }

    pub async fn add_message(&self, message: &NewMessage) -> ApiResult<Chat> {
        self.request(Method::POST, "/chats/message", Some(to_body(message)?))
            .await
    }

    pub async fn get_chat_messages(&self, chat_id: &str) -> ApiResult<ChatHistory> {
        let path = format!("/chats/{}/messages", urlencoding::encode(chat_id));
        self.request(Method::GET, &path, None).await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> ApiResult<()> {
        let path = format!("/chats/{}", urlencoding::encode(chat_id));
        self.request(Method::DELETE, &path, None).await
    }

    // Assistant endpoints

    pub async fn generate_text(&self, prompt: &str) -> ApiResult<GeneratedText> {
        let body = serde_json::json!({ "prompt": prompt });
        self.request(Method::POST, "/gemini/text", Some(body)).await
    }

    pub async fn analyze_image(&self, image_base64: &str) -> ApiResult<GeneratedText> {
        let body = serde_json::json!({ "image": image_base64 });
        self.request(Method::POST, "/gemini/analyze-image", Some(body))
            .await
    }

    // Health

    /// Unauthenticated liveness check against `{base}/health`.
    pub async fn health_check(&self) -> ApiResult<HealthStatus> {
        let url = format!("{}/health", self.config.base_url());
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: code,
                message: error_message(code, &text),
            });
        }
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| ApiError::Body(e.to_string()))
    }

    pub async fn is_backend_available(&self) -> bool {
        self.health_check().await.is_ok()
    }
}
