//! Checkout link redirect
//!
//! `GET /subscription/{link_id}` resolves the internal link and forwards the
//! browser to the live provider checkout URL. Used links are gone for good;
//! expired links were already regenerated in place during resolution.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use uuid::Uuid;

use crate::state::AppState;

pub async fn redirect(State(state): State<AppState>, Path(link_id): Path<Uuid>) -> Response {
    let resolved = match state.billing.links.resolve(link_id).await {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!(link_id = %link_id, error = %e, "Checkout link resolution failed");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    match resolved.redirect_url() {
        Some(url) => Redirect::temporary(url).into_response(),
        None => {
            tracing::info!(link_id = %link_id, "Checkout link already used");
            StatusCode::GONE.into_response()
        }
    }
}
