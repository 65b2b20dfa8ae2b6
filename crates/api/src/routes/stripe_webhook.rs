//! Stripe webhook endpoint
//!
//! Returns 400 only on signature failure so Stripe's redelivery keeps
//! working for transport problems. Processing failures return 200 anyway:
//! redelivering an event we already claimed and failed on cannot fix it,
//! and the failure is recorded in the webhook audit table for follow-up.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::state::AppState;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!("Stripe webhook without signature header");
        return StatusCode::BAD_REQUEST;
    };

    let event = match state.billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Stripe webhook signature verification failed");
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Err(e) = state.billing.webhooks.handle_event(event).await {
        tracing::error!(error = %e, "Stripe webhook processing failed; acknowledged anyway");
    }

    StatusCode::OK
}
