//! Pipedrive webhook endpoint
//!
//! Always answers 200. The sync engine swallows its own failures; anything
//! else (unparseable payload) is logged and dropped, because the CRM retries
//! non-2xx deliveries and retries of a bad payload only duplicate side
//! effects.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use menucraft_crm::Deal;

use crate::state::AppState;

pub async fn handle(State(state): State<AppState>, Json(payload): Json<serde_json::Value>) -> StatusCode {
    // Deliveries wrap the deal in `current`; direct payloads are the deal
    // itself.
    let deal_value = payload.get("current").cloned().unwrap_or(payload);

    let deal: Deal = match serde_json::from_value(deal_value) {
        Ok(deal) => deal,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable deal webhook payload; dropping");
            return StatusCode::OK;
        }
    };

    let outcome = state.crm.sync.handle_deal_event(deal).await;
    tracing::debug!(outcome = ?outcome, "Deal webhook handled");

    StatusCode::OK
}
