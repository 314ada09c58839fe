//! # Session Manager
//!
//! Owns the access/refresh token lifecycle of the lab console client:
//! durable token storage, de-duplicated refresh, and a request middleware
//! that signs REST calls and recovers one 401/403 per request.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod masking;
pub mod navigator;
pub mod storage;
pub mod structs;

// Re-exports
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use interceptor::{
    build_api_client, is_auth_failure, AuthMiddleware, InterceptDecision, RequestContext,
};
pub use manager::SessionManager;
pub use masking::mask_token;
pub use navigator::{LogNavigator, Navigator};
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};
pub use structs::{RefreshOutcome, TokenPayload, TokenRecord};
