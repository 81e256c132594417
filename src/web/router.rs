//! Route definitions for web server.

use axum::{
    routing::{get, post},
    Router,
};

use super::api::{self, AppState};

/// Create the API router.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/events", post(api::ingest_event))
        .route("/queue/stats", get(api::queue_stats))
}

/// Create the full app router.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::event::{ConversationKey, EntryId, QueuedEvent, SenderRole};
    use crate::core::ingest::Ingestor;
    use crate::guard::CooldownGuard;
    use crate::error::{Error, Result};
    use crate::store::{EventStore, MemoryEventStore, RawEntry};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<MemoryEventStore>, Arc<CooldownGuard>) {
        let store = Arc::new(MemoryEventStore::new());
        let guard = Arc::new(CooldownGuard::new(300.0, 20.0));
        let clock = Arc::new(ManualClock::new(100.0));
        let ingestor = Ingestor::new(store.clone(), guard.clone(), clock);
        (create_app_router(AppState { ingestor }), store, guard)
    }

    struct UnreachableStore;

    impl EventStore for UnreachableStore {
        fn append(&self, _event: &QueuedEvent) -> Result<EntryId> {
            Err(Error::Store("sqlite open: unable to open database file".to_string()))
        }
        fn scan_all(&self) -> Result<Vec<RawEntry>> {
            Err(Error::Store("sqlite open: unable to open database file".to_string()))
        }
        fn remove(&self, _ids: &[EntryId]) -> Result<usize> {
            Err(Error::Store("sqlite open: unable to open database file".to_string()))
        }
    }

    fn unreachable_app() -> Router {
        let ingestor = Ingestor::new(
            Arc::new(UnreachableStore),
            Arc::new(CooldownGuard::new(300.0, 20.0)),
            Arc::new(ManualClock::new(100.0)),
        );
        create_app_router(AppState { ingestor })
    }

    fn post_event(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_event_queues() {
        let (app, store, _) = app();
        let response = app
            .oneshot(post_event(
                r#"{"user_id":"553112345678","channel_id":"553198765432","sender_role":"usr","content":"Oi!"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let entries = store.scan_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, ConversationKey::new("553112345678", "553198765432"));
    }

    #[tokio::test]
    async fn test_echo_is_ignored() {
        let (app, store, guard) = app();
        guard.record_automated_reply(&ConversationKey::new("u", "c"), "Olá", 95.0);

        let response = app
            .oneshot(post_event(
                r#"{"user_id":"u","channel_id":"c","sender_role":"human_operator","content":"Olá"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.scan_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected() {
        let (app, _, _) = app();
        let response = app
            .oneshot(post_event(
                r#"{"user_id":"","channel_id":"c","sender_role":"user"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let (app, store, _) = app();
        store
            .append(&QueuedEvent::new(
                ConversationKey::new("u", "c"),
                SenderRole::User,
                "hi",
                1.0,
            ))
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/api/queue/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_failure_returns_service_unavailable() {
        let response = unreachable_app()
            .oneshot(post_event(
                r#"{"user_id":"u","channel_id":"c","sender_role":"user","content":"Oi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = unreachable_app()
            .oneshot(Request::builder().uri("/api/queue/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
