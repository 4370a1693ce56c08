use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/lockers/{kiosk_id}/{locker_id}/open", post(handlers::open))
        .route("/api/lockers/bulk-open", post(handlers::bulk_open))
        .route("/api/lockers/{kiosk_id}/{locker_id}/block", post(handlers::block))
        .route(
            "/api/lockers/{kiosk_id}/{locker_id}/unblock",
            post(handlers::unblock),
        )
        .route(
            "/api/lockers/commands/{command_id}",
            get(handlers::command_status),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
