//! Shared fixtures for session manager integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use session_manager::storage::save_token_record;
use session_manager::{
    MemorySessionStorage, Navigator, SessionConfig, SessionManager, SessionStorage, TokenRecord,
};

/// Navigator that remembers every redirect
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, route: &str) {
        self.routes.lock().push(route.to_string());
    }
}

pub struct Fixture {
    pub manager: SessionManager,
    pub storage: Arc<MemorySessionStorage>,
    pub navigator: Arc<RecordingNavigator>,
}

/// Manager against `backend_url` with an a1/r1 session valid for an hour.
pub async fn signed_in(backend_url: &str) -> Fixture {
    let storage = Arc::new(MemorySessionStorage::new());
    save_token_record(
        storage.as_ref(),
        &TokenRecord {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            user_info: Some(serde_json::json!({"id": 42, "name": "lab-admin"})),
        },
    )
    .await
    .expect("seed session");
    build(backend_url, storage).await
}

/// Manager against `backend_url` with empty storage.
pub async fn signed_out(backend_url: &str) -> Fixture {
    build(backend_url, Arc::new(MemorySessionStorage::new())).await
}

async fn build(backend_url: &str, storage: Arc<MemorySessionStorage>) -> Fixture {
    let navigator = Arc::new(RecordingNavigator::default());
    let manager = SessionManager::new(
        SessionConfig::default().with_backend_url(backend_url),
        Arc::clone(&storage) as Arc<dyn SessionStorage>,
        Arc::clone(&navigator) as Arc<dyn Navigator>,
    )
    .await
    .expect("session manager");
    Fixture {
        manager,
        storage,
        navigator,
    }
}

/// Mock response builder for the auth backend
pub struct MockResponseBuilder;

impl MockResponseBuilder {
    pub fn tokens(access_token: &str, refresh_token: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "code": 0,
            "data": {
                "access_token": access_token,
                "refresh_token": refresh_token,
                "expires_in": expires_in,
                "token_type": "Bearer"
            }
        })
    }

    pub fn login(access_token: &str, refresh_token: &str, user: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "code": 0,
            "data": {
                "access_token": access_token,
                "refresh_token": refresh_token,
                "expires_in": 7200,
                "token_type": "Bearer",
                "user_info": user
            }
        })
    }

    pub fn rejected(code: i64, message: &str) -> serde_json::Value {
        serde_json::json!({ "code": code, "message": message })
    }
}
