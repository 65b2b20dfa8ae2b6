pub mod checkout_link;
pub mod crm_webhook;
pub mod stripe_webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(stripe_webhook::handle))
        .route("/webhooks/pipedrive", post(crm_webhook::handle))
        .route("/subscription/{link_id}", get(checkout_link::redirect))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
