//! Read-only operator API over the claim journal.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::pipeline::journal::ClaimJournal;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state of the admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub journal: ClaimJournal,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(journal: ClaimJournal, api_key: &str) -> Self {
        Self {
            journal,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/claims", get(get_claims))
        .route("/admin/claims/failed", get(get_failed_claims))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API on `bind_address` until `shutdown` fires.
pub async fn serve(
    bind_address: &str,
    state: AdminState,
    shutdown: crate::lifecycle::Shutdown,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = %bind_address, "Admin API listening");
    let mut rx = shutdown.subscribe();
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { rx.recv().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{EventId, ValidationEvent};
    use crate::pipeline::types::ClaimState;
    use alloy::primitives::{Address, U256};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let journal = ClaimJournal::new(None);
        for (id, wh) in [("0xaa:0", 100u64), ("0xbb:1", 250)] {
            journal.try_observe(&ValidationEvent {
                event_id: EventId::from(id),
                asset: Address::with_last_byte(3),
                claimed_wh: U256::from(wh),
                block_number: 4,
            });
        }
        journal.transition(&EventId::from("0xbb:1"), ClaimState::Failed, Some("timeout".into()));
        AdminState::new(journal, "secret")
    }

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_key() {
        let app = setup_admin_router(state());
        let resp = app.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app.oneshot(get("/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_summarizes_journal() {
        let app = setup_admin_router(state());
        let resp = app.oneshot(get("/admin/status", Some("secret"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["claims"]["observed"], 1);
        assert_eq!(json["claims"]["failed"], 1);
    }

    #[tokio::test]
    async fn test_failed_claims() {
        let app = setup_admin_router(state());
        let resp = app
            .oneshot(get("/admin/claims/failed", Some("secret")))
            .await
            .unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let failed = json.as_array().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["event_id"], "0xbb:1");
        assert_eq!(failed[0]["reason"], "timeout");
    }

    #[tokio::test]
    async fn test_claims_filtered_by_state() {
        let app = setup_admin_router(state());
        let resp = app
            .oneshot(get("/admin/claims?state=observed", Some("secret")))
            .await
            .unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
    }
}
