use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{commands, kiosks, rfid};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/commands", post(commands::enqueue))
        .route("/commands/{command_id}", get(commands::get_command))
        .route("/commands/{command_id}/cancel", post(commands::cancel))
        .route(
            "/kiosks/{kiosk_id}/commands",
            get(commands::list_for_kiosk),
        )
        .route("/kiosks/{kiosk_id}/commands/claim", post(commands::claim))
        .route(
            "/kiosks/{kiosk_id}/commands/{command_id}/complete",
            post(commands::complete),
        )
        .route(
            "/kiosks/{kiosk_id}/commands/{command_id}/fail",
            post(commands::fail),
        )
        .route(
            "/kiosks/{kiosk_id}/lockers/{locker_id}/pulse-result",
            post(commands::pulse_result),
        )
        .route("/kiosks/{kiosk_id}/heartbeat", post(kiosks::heartbeat))
        .route("/kiosks", get(kiosks::list))
        .route("/kiosks/{kiosk_id}/lockers", get(kiosks::list_lockers))
        .route("/kiosks/{kiosk_id}/rfid/scan", post(rfid::scan))
        .route("/kiosks/{kiosk_id}/rfid/result", post(rfid::result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
