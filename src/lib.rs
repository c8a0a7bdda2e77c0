//! NutriChat client core: backend discovery, authenticated API access, and
//! offline chat fallback.
//!
//! The UI layer drives this crate: `AuthFlow::initialize` at app start
//! resolves a reachable backend and restores the stored session, domain
//! calls go through `ApiClient`, and the glue in `chat_store` keeps chat
//! working (in degraded form) when the backend path is down.

pub mod api;
pub mod auth;
pub mod chat_store;
pub mod diagnostics;
pub mod network;
pub mod session;
pub mod storage;

pub use api::{
    ApiClient, ApiError, ApiResult, ClientConfig, NewMessage, RegisterRequest, User, UserUpdate,
};
pub use auth::{AuthError, AuthFlow, InitReport};
pub use chat_store::{ChatSummary, Delivery, LocalChatStore, StoredMessage};
pub use network::{DetectionMethod, Platform, ProbeResult, ResolutionFailure, ResolvedEndpoint};
pub use session::SessionStore;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StoreError};
