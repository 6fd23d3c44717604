// HTTP routes: health check, Prometheus metrics and the Telegram webhook.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::metrics;
use crate::session::Coordinator;
use crate::transport::telegram::Update;
use crate::transport::Transport;

/// Header Telegram uses to echo the secret given to `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

// ── Shared application state ─────────────────────────────────────────

pub struct AppState<T> {
    pub coordinator: Coordinator<T>,
    pub webhook_secret: Option<String>,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router<T: Transport>(coordinator: Coordinator<T>, webhook_secret: Option<String>) -> Router {
    let state = AppState {
        coordinator,
        webhook_secret,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/telegram/webhook", post(webhook::<T>))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "tally-bot" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

async fn webhook<T: Transport>(
    State(state): State<AppState<T>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.webhook_secret {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid secret token" })),
            )
                .into_response();
        }
    }

    // Always acknowledge, otherwise Telegram redelivers the same update.
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!("Undecodable webhook update: {e}");
            return StatusCode::OK.into_response();
        }
    };

    if let Some(event) = update.into_event() {
        if let Err(e) = state.coordinator.handle_event(event).await {
            tracing::error!("Failed to handle update: {e}");
        }
    }
    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::db::Database;
    use crate::store::SessionStore;
    use crate::transport::{ChatId, Keyboard, MessageId, TransportError};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    impl Transport for Outbox {
        async fn send_message(
            &self,
            chat_id: ChatId,
            text: &str,
            _keyboard: Option<&Keyboard>,
        ) -> Result<MessageId, TransportError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((chat_id, text.to_string()));
            Ok(sent.len() as MessageId)
        }

        async fn edit_message(
            &self,
            _chat_id: ChatId,
            _message_id: MessageId,
            _text: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn answer_button(&self, _callback_id: &str, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    async fn test_app(secret: Option<&str>) -> (Router, Arc<Outbox>) {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let store = Arc::new(SessionStore::load(db).await.unwrap());
        let outbox = Arc::new(Outbox::default());
        let coordinator = Coordinator::new(store, outbox.clone());
        (router(coordinator, secret.map(String::from)), outbox)
    }

    fn start_update() -> String {
        json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "chat": {"id": 42, "type": "private"},
                "text": "/start"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app(None).await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _) = test_app(None).await;
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_dispatches_update() {
        let (app, outbox) = test_app(None).await;
        let response = app
            .oneshot(
                Request::post("/telegram/webhook")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(start_update()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        assert!(sent[0].1.contains("<code>42</code>"));
    }

    #[tokio::test]
    async fn test_webhook_checks_secret() {
        let (app, outbox) = test_app(Some("s3cret")).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/telegram/webhook")
                    .header(SECRET_HEADER, "wrong")
                    .body(Body::from(start_update()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(outbox.sent.lock().unwrap().is_empty());

        let response = app
            .oneshot(
                Request::post("/telegram/webhook")
                    .header(SECRET_HEADER, "s3cret")
                    .body(Body::from(start_update()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(outbox.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_garbage() {
        let (app, outbox) = test_app(None).await;
        let response = app
            .oneshot(
                Request::post("/telegram/webhook")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(outbox.sent.lock().unwrap().is_empty());
    }
}
