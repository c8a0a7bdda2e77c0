//! End-to-end scenarios against an in-process mock backend: an axum router
//! bound to a random port, with call counters for the refresh-and-retry
//! invariants.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nutrichat_client::chat_store::{self, LocalChatStore, StoredMessage};
use nutrichat_client::network::{self, DetectionMethod};
use nutrichat_client::{
    ApiClient, ApiError, AuthFlow, ClientConfig, Delivery, MemoryStore, SessionStore,
};

struct MockState {
    refresh_succeeds: bool,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    message_calls: AtomicUsize,
    seen_user_auth: Mutex<Vec<String>>,
}

impl MockState {
    fn new(refresh_succeeds: bool) -> Arc<Self> {
        Arc::new(MockState {
            refresh_succeeds,
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            message_calls: AtomicUsize::new(0),
            seen_user_auth: Mutex::new(Vec::new()),
        })
    }
}

fn user_json() -> Value {
    json!({
        "id": "u1",
        "fullname": "Ada Test",
        "email": "ada@example.com",
        "phone": "123"
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": "2024-01-01T00:00:00Z",
        "version": "1.0.0"
    }))
}

async fn login(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    let email = body.get("email").and_then(Value::as_str);
    let password = body.get("password").and_then(Value::as_str);
    if email == Some("ada@example.com") && password == Some("secret") {
        (
            StatusCode::OK,
            Json(json!({ "accessToken": "t1", "user": user_json() })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid email or password" })),
        )
    }
}

async fn refresh(State(state): State<Arc<MockState>>) -> (StatusCode, Json<Value>) {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if state.refresh_succeeds {
        (StatusCode::OK, Json(json!({ "accessToken": "t2" })))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "refresh token expired" })),
        )
    }
}

async fn get_user(
    State(state): State<Arc<MockState>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    state
        .seen_user_auth
        .lock()
        .expect("auth log")
        .push(auth);
    Json(user_json())
}

/// 401 until a request arrives with the refreshed token.
async fn add_message(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.message_calls.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if auth == "Bearer t2" {
        (
            StatusCode::OK,
            Json(json!({
                "_id": "c-real",
                "chatId": "c-real",
                "roomId": "r1",
                "title": "Chat",
                "messages": []
            })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "jwt expired" })))
    }
}

async fn delete_chat(Path(_id): Path<String>) -> StatusCode {
    StatusCode::NO_CONTENT
}

fn mock_router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/users/{id}", get(get_user))
        .route("/api/chats/message", post(add_message))
        .route("/api/chats/{id}", delete(delete_chat))
        .with_state(state)
}

async fn spawn_backend(state: Arc<MockState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, mock_router(state))
            .await
            .expect("serve mock backend");
    });
    format!("http://{}/api", addr)
}

fn client_for(base_url: &str) -> ApiClient {
    let _ = env_logger::builder().is_test(true).try_init();
    let session = SessionStore::new(Arc::new(MemoryStore::new()));
    ApiClient::new(ClientConfig::new(base_url), session)
}

#[tokio::test]
async fn login_stores_session_and_sends_bearer_token() {
    let state = MockState::new(true);
    let base = spawn_backend(state.clone()).await;
    let client = client_for(&base);
    let flow = AuthFlow::new(client.clone());

    let user = flow
        .login("ada@example.com", "secret")
        .await
        .expect("login succeeds");
    assert_eq!(user.id, "u1");
    assert_eq!(client.session().get_token().as_deref(), Some("t1"));

    client.get_user("u1").await.expect("profile fetch succeeds");
    let seen = state.seen_user_auth.lock().expect("auth log");
    assert_eq!(seen.as_slice(), ["Bearer t1"]);
}

#[tokio::test]
async fn failed_login_surfaces_server_error_without_refresh() {
    let state = MockState::new(true);
    let base = spawn_backend(state.clone()).await;
    let client = client_for(&base);

    let err = client
        .login("ada@example.com", "wrong")
        .await
        .expect_err("login fails");
    match err {
        ApiError::Http { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid email or password");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
    assert_eq!(
        state.refresh_calls.load(Ordering::SeqCst),
        0,
        "a 401 from login itself must not trigger refresh"
    );
}

#[tokio::test]
async fn expired_token_refreshes_once_and_retries() {
    let state = MockState::new(true);
    let base = spawn_backend(state.clone()).await;
    let client = client_for(&base);
    client.session().set_token("t0");

    let chat = client
        .add_message(&nutrichat_client::NewMessage {
            chat_id: Some("c1".to_string()),
            sender_id: Some("u1".to_string()),
            text: Some("hello".to_string()),
            image_uri: None,
            from_ai: false,
        })
        .await
        .expect("retry after refresh succeeds");

    assert_eq!(chat.id, "c-real", "outcome is the retry's payload");
    assert_eq!(state.message_calls.load(Ordering::SeqCst), 2, "original + one retry");
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1, "exactly one refresh");
    assert_eq!(client.session().get_token().as_deref(), Some("t2"));
}

#[tokio::test]
async fn failed_refresh_returns_original_401() {
    let state = MockState::new(false);
    let base = spawn_backend(state.clone()).await;
    let client = client_for(&base);
    client.session().set_token("t0");

    let err = client
        .add_message(&nutrichat_client::NewMessage {
            chat_id: Some("c1".to_string()),
            text: Some("hello".to_string()),
            ..Default::default()
        })
        .await
        .expect_err("request fails when refresh fails");
    match err {
        ApiError::Http { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "jwt expired", "the original 401, not the refresh failure");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
    assert_eq!(state.message_calls.load(Ordering::SeqCst), 1, "no retry without a new token");
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_identical_requests_yield_equivalent_outcomes() {
    let state = MockState::new(true);
    let base = spawn_backend(state.clone()).await;
    let client = client_for(&base);
    client.session().set_token("t1");

    let first = client.get_user("u1").await.expect("first fetch");
    let second = client.get_user("u1").await.expect("second fetch");
    assert_eq!(first, second, "a stable backend gives a stable result");

    let seen = state.seen_user_auth.lock().expect("auth log");
    assert_eq!(seen.as_slice(), ["Bearer t1", "Bearer t1"]);
}

#[tokio::test]
async fn delete_chat_accepts_empty_204_response() {
    let state = MockState::new(true);
    let base = spawn_backend(state).await;
    let client = client_for(&base);
    client.delete_chat("c1").await.expect("204 maps to empty success");
}

#[tokio::test]
async fn health_check_parses_status_payload() {
    let state = MockState::new(true);
    let base = spawn_backend(state).await;
    let client = client_for(&base);
    let health = client.health_check().await.expect("health check succeeds");
    assert_eq!(health.status, "ok");
    assert_eq!(health.version.as_deref(), Some("1.0.0"));
    assert!(client.is_backend_available().await);
}

#[tokio::test]
async fn resolution_failure_reports_first_candidate_and_full_list() {
    // Four loopback ports with nothing listening.
    let candidates: Vec<String> = [19998, 19997, 19996, 19995]
        .iter()
        .map(|p| format!("http://127.0.0.1:{}/api", p))
        .collect();
    let http = reqwest::Client::new();
    let err = network::resolve_with(&candidates, DetectionMethod::Default, |url| {
        let http = http.clone();
        async move { network::probe(&http, &url).await }
    })
    .await
    .expect_err("no candidate is reachable");

    assert_eq!(err.first.url, candidates[0]);
    assert_eq!(err.candidates.len(), 4);
    assert!(err.first.error.is_some());
}

#[tokio::test]
async fn unreachable_backend_parks_message_in_local_store() {
    let client = client_for("http://127.0.0.1:19999/api");
    let local = LocalChatStore::new(Arc::new(MemoryStore::new()));
    let message = StoredMessage {
        id: "m1".to_string(),
        text: Some("offline hello".to_string()),
        image_uri: None,
        from_ai: false,
        timestamp: chat_store::now_ms(),
        sender_id: Some("u1".to_string()),
    };

    let delivery = chat_store::send_message(&client, &local, "c1", &message)
        .await
        .expect("fallback path never errors on network failure");
    assert_eq!(delivery, Delivery::Local);

    let stored = local.get_messages("c1").expect("local store readable");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text.as_deref(), Some("offline hello"));
}

#[tokio::test]
async fn fetch_messages_falls_back_to_local_mirror() {
    let client = client_for("http://127.0.0.1:19999/api");
    let local = LocalChatStore::new(Arc::new(MemoryStore::new()));
    local
        .append_message(
            "c1",
            &StoredMessage {
                id: "m1".to_string(),
                text: Some("cached".to_string()),
                image_uri: None,
                from_ai: true,
                timestamp: 42,
                sender_id: None,
            },
            chat_store::DEFAULT_MAX_MESSAGES,
        )
        .expect("seed local store");

    let messages = chat_store::fetch_messages(&client, &local, "c1")
        .await
        .expect("fallback read");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text.as_deref(), Some("cached"));
}
