//! CRM error types

use thiserror::Error;

pub type CrmResult<T> = Result<T, CrmError>;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The CRM answered but refused the call.
    #[error("CRM API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("CRM payload parse error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A custom field could not be resolved from the schema. Degrades
    /// gracefully: callers log and abort the write instead of failing hard.
    #[error("CRM field not resolvable: {0}")]
    FieldResolution(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Billing(#[from] menucraft_billing::BillingError),
}
