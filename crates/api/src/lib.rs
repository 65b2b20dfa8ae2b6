//! menucraft API surface
//!
//! Thin axum layer over the billing and CRM services: the two webhook
//! endpoints and the checkout-link redirect. All logic lives in the service
//! crates; handlers only translate HTTP.

pub mod config;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use routes::router;
pub use state::AppState;
