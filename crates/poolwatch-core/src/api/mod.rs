//! REST API implementation
//!
//! This module provides the HTTP API for managing rules, alerts and
//! maintenance windows, and for pushing pool samples.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::alerting::AlertEvaluator;
use crate::error::{Error, Result};

/// HTTP API server
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(evaluator: Arc<AlertEvaluator>) -> Self {
        Self {
            state: AppState { evaluator },
        }
    }

    /// Router with CORS and request tracing applied
    pub fn router(&self) -> axum::Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        create_router(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, addr: &str, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::internal(format!("failed to bind {addr}: {e}")))?;

        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::test_support::RecordingChannel;
    use crate::channels::{Channel, ChannelRegistry};
    use crate::config::AlertingConfig;
    use crate::db::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> axum::Router {
        let registry =
            ChannelRegistry::new(vec![RecordingChannel::ok("recorder") as Arc<dyn Channel>])
                .unwrap();
        let evaluator = AlertEvaluator::new(
            Arc::new(MemoryStore::new()),
            &AlertingConfig::default(),
            registry,
        );
        HttpServer::new(Arc::new(evaluator)).router()
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_lists_channels() {
        let app = router();

        let (status, body) = call(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["channels"], json!(["recorder"]));
    }

    #[tokio::test]
    async fn rule_crud_and_error_mapping() {
        let app = router();
        let rule = json!({
            "name": "high_usage",
            "condition": "usage > 80",
            "severity": "warning",
            "message": "Pool usage is high: {{Usage}}%"
        });

        let (status, created) = call(&app, "POST", "/api/v1/rules", Some(rule.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["enabled"], true);
        let id = created["id"].as_i64().unwrap();

        let (status, body) = call(&app, "POST", "/api/v1/rules", Some(rule)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("already exists"));

        let (status, toggled) =
            call(&app, "POST", &format!("/api/v1/rules/{id}/toggle"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(toggled["enabled"], false);

        let (status, _) = call(&app, "DELETE", &format!("/api/v1/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, "GET", &format!("/api/v1/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn validate_reports_errors() {
        let app = router();

        let (_, ok) = call(
            &app,
            "POST",
            "/api/v1/rules/validate",
            Some(json!({ "condition": "heap_usage>=90" })),
        )
        .await;
        let (_, bad) = call(
            &app,
            "POST",
            "/api/v1/rules/validate",
            Some(json!({ "condition": "latency > 5" })),
        )
        .await;

        assert_eq!(ok["valid"], true);
        assert_eq!(ok["normalized"], "heap_usage >= 90");
        assert_eq!(bad["valid"], false);
        assert!(bad["error"].is_string());
    }

    #[tokio::test]
    async fn pushed_samples_open_alerts() {
        let app = router();
        call(
            &app,
            "POST",
            "/api/v1/rules",
            Some(json!({
                "name": "high_usage",
                "condition": "usage > 80",
                "severity": "critical",
                "message": "{{Usage}}%"
            })),
        )
        .await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/samples",
            Some(json!({ "target_name": "user-service", "active": 90, "max": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["transitions"], 1);

        let (_, alerts) = call(&app, "GET", "/api/v1/alerts?status=fired", None).await;
        assert_eq!(alerts.as_array().unwrap().len(), 1);
        assert_eq!(alerts[0]["message"], "90%");
        let id = alerts[0]["id"].as_i64().unwrap();

        let (status, resolved) =
            call(&app, "POST", &format!("/api/v1/alerts/{id}/resolve"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], "resolved");

        let (status, _) = call(&app, "GET", "/api/v1/alerts?status=open", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn maintenance_windows_and_test_alerts() {
        let app = router();

        let (status, window) = call(
            &app,
            "POST",
            "/api/v1/maintenance",
            Some(json!({
                "name": "nightly",
                "start_time": "2024-01-01T02:00:00Z",
                "end_time": "2024-01-01T03:00:00Z",
                "recurring": true,
                "days_of_week": ["Mon", "Tue"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, windows) = call(&app, "GET", "/api/v1/maintenance", None).await;
        assert_eq!(windows.as_array().unwrap().len(), 1);

        let id = window["id"].as_i64().unwrap();
        let (status, _) = call(&app, "DELETE", &format!("/api/v1/maintenance/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, response) = call(
            &app,
            "POST",
            "/api/v1/alerts/test",
            Some(json!({ "severity": "info", "channels": ["recorder"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["targeted"], json!(["recorder"]));
        assert_eq!(response["results"][0]["success"], true);
    }
}
