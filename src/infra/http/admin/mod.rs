mod health;
mod purge;
mod state;

pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::middleware::{log_responses, set_request_context};

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(health::admin_health))
        .route("/purge", post(purge::admin_purge_tag))
        .route("/flush", post(purge::admin_flush_site))
        .route("/flush/{content_id}", post(purge::admin_flush_content))
        .route("/events", post(purge::admin_content_event))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
