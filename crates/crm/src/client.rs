//! Pipedrive gateway
//!
//! Typed wrapper over the CRM's deal/organization/person/user reads and the
//! deal field-update operation. Field schema lookups are cached with a long
//! TTL (keys change rarely), entity reads with a short one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::error::{CrmError, CrmResult};
use crate::fields::{resolve_field, CrmDealFieldRef, CustomFieldValue, DealField};

const FIELD_SCHEMA_TTL: Duration = Duration::from_secs(30 * 60);
const ENTITY_TTL: Duration = Duration::from_secs(60);

/// CRM configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub base_url: String,
    pub api_token: String,
    /// Display name of the deal field holding the payment link.
    pub payment_link_field: String,
    /// Display name of the deal field holding the link fingerprint.
    pub fingerprint_field: String,
    /// Display name of the deal field holding the rep's Slack id.
    pub slack_field: String,
}

impl CrmConfig {
    pub fn from_env() -> CrmResult<Self> {
        let api_token = std::env::var("PIPEDRIVE_API_TOKEN").map_err(|_| {
            CrmError::Validation("PIPEDRIVE_API_TOKEN not set".to_string())
        })?;
        let base_url = std::env::var("PIPEDRIVE_BASE_URL")
            .unwrap_or_else(|_| "https://api.pipedrive.com/v1".to_string());

        Ok(Self {
            base_url,
            api_token,
            payment_link_field: std::env::var("PIPEDRIVE_PAYMENT_LINK_FIELD")
                .unwrap_or_else(|_| "Payment Link".to_string()),
            fingerprint_field: std::env::var("PIPEDRIVE_FINGERPRINT_FIELD")
                .unwrap_or_else(|_| "Payment Link Fingerprint".to_string()),
            slack_field: std::env::var("PIPEDRIVE_SLACK_FIELD")
                .unwrap_or_else(|_| "Sales Rep Slack".to_string()),
        })
    }
}

/// The CRM wraps every response in this envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

/// Linked-entity reference: a bare id or an object carrying one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Id(i64),
    Object { value: i64 },
}

impl EntityRef {
    pub fn id(&self) -> i64 {
        match self {
            EntityRef::Id(id) => *id,
            EntityRef::Object { value } => *value,
        }
    }
}

/// Contact values come as a plain string or a list of entries with a
/// `primary` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContactValue {
    Plain(String),
    Entries(Vec<ContactEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEntry {
    pub value: String,
    #[serde(default)]
    pub primary: bool,
}

impl ContactValue {
    /// The primary entry, or the first one, or the plain value.
    pub fn primary(&self) -> Option<String> {
        match self {
            ContactValue::Plain(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            ContactValue::Entries(entries) => entries
                .iter()
                .find(|e| e.primary)
                .or_else(|| entries.first())
                .map(|e| e.value.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

/// A deal as delivered by the deal-updated webhook and the read endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub status: Option<String>,
    /// Deal value in major currency units as the CRM stores it.
    pub value: Option<f64>,
    pub org_id: Option<EntityRef>,
    pub person_id: Option<EntityRef>,
    pub owner_id: Option<EntityRef>,
    #[serde(default)]
    pub custom_fields: HashMap<String, CustomFieldValue>,
}

impl Deal {
    /// Deal value in minor currency units.
    pub fn price_cents(&self) -> Option<i64> {
        self.value.map(|v| (v * 100.0).round() as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<ContactValue>,
    pub phone: Option<ContactValue>,
}

/// A CRM user (deal owner / sales rep).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmUser {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub struct PipedriveClient {
    http: reqwest::Client,
    config: Arc<CrmConfig>,
    field_cache: TtlCache<Vec<DealField>>,
    org_cache: TtlCache<Organization>,
    person_cache: TtlCache<Person>,
    user_cache: TtlCache<CrmUser>,
}

impl PipedriveClient {
    pub fn new(config: CrmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
            field_cache: TtlCache::new(FIELD_SCHEMA_TTL),
            org_cache: TtlCache::new(ENTITY_TTL),
            person_cache: TtlCache::new(ENTITY_TTL),
            user_cache: TtlCache::new(ENTITY_TTL),
        }
    }

    pub fn from_env() -> CrmResult<Self> {
        Ok(Self::new(CrmConfig::from_env()?))
    }

    pub fn config(&self) -> &CrmConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}?api_token={}",
            self.config.base_url.trim_end_matches('/'),
            path,
            self.config.api_token
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CrmResult<T> {
        let response = self.http.get(self.url(path)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CrmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.success {
            return Err(CrmError::Api {
                status: status.as_u16(),
                message: "CRM reported success=false".to_string(),
            });
        }
        envelope.data.ok_or_else(|| CrmError::Api {
            status: status.as_u16(),
            message: "CRM response has no data".to_string(),
        })
    }

    pub async fn get_deal(&self, deal_id: i64) -> CrmResult<Deal> {
        self.get_json(&format!("deals/{}", deal_id)).await
    }

    pub async fn get_organization(&self, org_id: i64) -> CrmResult<Organization> {
        let key = org_id.to_string();
        if let Some(cached) = self.org_cache.get(&key).await {
            return Ok(cached);
        }
        let org: Organization = self.get_json(&format!("organizations/{}", org_id)).await?;
        self.org_cache.set(&key, org.clone()).await;
        Ok(org)
    }

    pub async fn get_person(&self, person_id: i64) -> CrmResult<Person> {
        let key = person_id.to_string();
        if let Some(cached) = self.person_cache.get(&key).await {
            return Ok(cached);
        }
        let person: Person = self.get_json(&format!("persons/{}", person_id)).await?;
        self.person_cache.set(&key, person.clone()).await;
        Ok(person)
    }

    pub async fn get_user(&self, user_id: i64) -> CrmResult<CrmUser> {
        let key = user_id.to_string();
        if let Some(cached) = self.user_cache.get(&key).await {
            return Ok(cached);
        }
        let user: CrmUser = self.get_json(&format!("users/{}", user_id)).await?;
        self.user_cache.set(&key, user.clone()).await;
        Ok(user)
    }

    /// The deal field schema, cached. Field keys are CRM-assigned and rarely
    /// change, but they are not guaranteed stable across calls.
    pub async fn deal_fields(&self) -> CrmResult<Vec<DealField>> {
        if let Some(cached) = self.field_cache.get("deal_fields").await {
            return Ok(cached);
        }
        let fields: Vec<DealField> = self.get_json("dealFields").await?;
        self.field_cache.set("deal_fields", fields.clone()).await;
        Ok(fields)
    }

    /// Resolve a custom field by display name.
    pub async fn find_field(&self, name: &str) -> CrmResult<Option<CrmDealFieldRef>> {
        let fields = self.deal_fields().await?;
        Ok(resolve_field(&fields, name))
    }

    /// Partial patch of a deal's custom fields by field key.
    pub async fn update_deal_fields(
        &self,
        deal_id: i64,
        values: HashMap<String, String>,
    ) -> CrmResult<()> {
        let mut body = serde_json::Map::new();
        for (key, value) in values {
            body.insert(key, serde_json::Value::String(value));
        }

        let response = self
            .http
            .put(self.url(&format!("deals/{}", deal_id)))
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CrmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(deal_id = deal_id, "Updated deal custom fields");
        Ok(())
    }

    /// Drop all caches; the next reads go back to the CRM.
    pub async fn clear_caches(&self) {
        self.field_cache.clear().await;
        self.org_cache.clear().await;
        self.person_cache.clear().await;
        self.user_cache.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_both_shapes() {
        let bare: EntityRef = serde_json::from_str("17").unwrap();
        assert_eq!(bare.id(), 17);

        let wrapped: EntityRef = serde_json::from_str(r#"{"value": 17}"#).unwrap();
        assert_eq!(wrapped.id(), 17);
    }

    #[test]
    fn contact_value_prefers_primary() {
        let entries: ContactValue = serde_json::from_str(
            r#"[{"value": "second@example.com", "primary": false},
                {"value": "first@example.com", "primary": true}]"#,
        )
        .unwrap();
        assert_eq!(entries.primary().as_deref(), Some("first@example.com"));

        let no_primary: ContactValue = serde_json::from_str(
            r#"[{"value": "only@example.com"}]"#,
        )
        .unwrap();
        assert_eq!(no_primary.primary().as_deref(), Some("only@example.com"));

        let plain: ContactValue = serde_json::from_str(r#""plain@example.com""#).unwrap();
        assert_eq!(plain.primary().as_deref(), Some("plain@example.com"));
    }

    #[test]
    fn deal_price_in_cents() {
        let deal: Deal = serde_json::from_str(
            r#"{"id": 1, "status": "open", "value": 129.0,
                "org_id": 5, "person_id": null, "owner_id": null}"#,
        )
        .unwrap();
        assert_eq!(deal.price_cents(), Some(12900));
        assert_eq!(deal.org_id.as_ref().map(|r| r.id()), Some(5));
    }
}
