//! API routes

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Rules
        .route(
            "/api/v1/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route("/api/v1/rules/validate", post(handlers::validate_condition))
        .route(
            "/api/v1/rules/:id",
            get(handlers::get_rule)
                .put(handlers::update_rule)
                .delete(handlers::delete_rule),
        )
        .route("/api/v1/rules/:id/toggle", post(handlers::toggle_rule))

        // Alerts
        .route("/api/v1/alerts", get(handlers::list_alerts))
        .route("/api/v1/alerts/test", post(handlers::test_alert))
        .route("/api/v1/alerts/:id/resolve", post(handlers::resolve_alert))

        // Maintenance windows
        .route(
            "/api/v1/maintenance",
            get(handlers::list_windows).post(handlers::create_window),
        )
        .route("/api/v1/maintenance/:id", delete(handlers::delete_window))

        // Sample ingestion
        .route("/api/v1/samples", post(handlers::ingest_sample))

        .with_state(state)
}
