use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

/// Public routes: health check.
pub fn create_public_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(handlers::api::health_check))
}

/// Telephony media-stream WebSocket routes.
pub fn create_stream_router() -> Router<Arc<AppState>> {
    Router::new().route("/telephony/stream", get(handlers::ws::telephony_stream_handler))
}

/// Control-plane callback routes: conference status events and TwiML.
pub fn create_hook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hooks/conference", post(handlers::hooks::conference_status_handler))
        .route(
            "/telephony/twiml/conference",
            get(handlers::hooks::conference_twiml_handler)
                .post(handlers::hooks::conference_twiml_handler),
        )
}
