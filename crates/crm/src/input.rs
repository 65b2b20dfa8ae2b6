//! Subscription input construction
//!
//! A deal event carries only ids for its linked organization, person, and
//! owner. The three enrichment reads are issued concurrently and settled as
//! a batch; a failure in any one branch is logged and leaves that field
//! empty instead of failing the build.

use crate::client::{CrmUser, Deal, Organization, Person, PipedriveClient};
use crate::fingerprint::SubscriptionInput;

/// Enrichment data fetched alongside a deal.
#[derive(Debug, Clone, Default)]
pub struct DealEnrichment {
    pub organization: Option<Organization>,
    pub person: Option<Person>,
    pub owner: Option<CrmUser>,
}

/// Fetch organization, person, and owner concurrently, isolating failures
/// per branch.
pub async fn fetch_enrichment(crm: &PipedriveClient, deal: &Deal) -> DealEnrichment {
    let org_id = deal.org_id.as_ref().map(|r| r.id());
    let person_id = deal.person_id.as_ref().map(|r| r.id());
    let owner_id = deal.owner_id.as_ref().map(|r| r.id());

    let org_fut = async {
        match org_id {
            Some(id) => match crm.get_organization(id).await {
                Ok(org) => Some(org),
                Err(e) => {
                    tracing::warn!(deal_id = deal.id, org_id = id, error = %e,
                        "Organization enrichment failed");
                    None
                }
            },
            None => None,
        }
    };

    let person_fut = async {
        match person_id {
            Some(id) => match crm.get_person(id).await {
                Ok(person) => Some(person),
                Err(e) => {
                    tracing::warn!(deal_id = deal.id, person_id = id, error = %e,
                        "Person enrichment failed");
                    None
                }
            },
            None => None,
        }
    };

    let owner_fut = async {
        match owner_id {
            Some(id) => match crm.get_user(id).await {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(deal_id = deal.id, owner_id = id, error = %e,
                        "Owner enrichment failed");
                    None
                }
            },
            None => None,
        }
    };

    let (organization, person, owner) = tokio::join!(org_fut, person_fut, owner_fut);

    DealEnrichment {
        organization,
        person,
        owner,
    }
}

/// Assemble the canonical subscription input from a deal and its enrichment.
/// Pure: the slack id is resolved by the caller, which owns field-schema
/// access.
pub fn assemble_input(
    deal: &Deal,
    enrichment: &DealEnrichment,
    sales_rep_slack_id: Option<String>,
) -> SubscriptionInput {
    SubscriptionInput {
        deal_id: deal.id,
        price: deal.price_cents().unwrap_or(0),
        restaurant_name: enrichment
            .organization
            .as_ref()
            .and_then(|o| o.name.clone())
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        name: enrichment
            .person
            .as_ref()
            .and_then(|p| p.name.clone())
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        email: enrichment
            .person
            .as_ref()
            .and_then(|p| p.email.as_ref())
            .and_then(|e| e.primary()),
        phone_number: enrichment
            .person
            .as_ref()
            .and_then(|p| p.phone.as_ref())
            .and_then(|p| p.primary()),
        sales_rep_slack_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ContactEntry, ContactValue, EntityRef};
    use std::collections::HashMap;

    fn deal() -> Deal {
        Deal {
            id: 7,
            status: Some("open".to_string()),
            value: Some(99.0),
            org_id: Some(EntityRef::Id(1)),
            person_id: Some(EntityRef::Id(2)),
            owner_id: Some(EntityRef::Id(3)),
            custom_fields: HashMap::new(),
        }
    }

    #[test]
    fn assembles_from_full_enrichment() {
        let enrichment = DealEnrichment {
            organization: Some(Organization {
                id: 1,
                name: Some(" Bistro Nine ".to_string()),
            }),
            person: Some(Person {
                id: 2,
                name: Some("Kim Lee".to_string()),
                email: Some(ContactValue::Entries(vec![ContactEntry {
                    value: "kim@bistronine.example".to_string(),
                    primary: true,
                }])),
                phone: Some(ContactValue::Plain("2345678900".to_string())),
            }),
            owner: None,
        };

        let input = assemble_input(&deal(), &enrichment, Some("U12345678".to_string()));
        assert_eq!(input.deal_id, 7);
        assert_eq!(input.price, 9900);
        assert_eq!(input.restaurant_name.as_deref(), Some("Bistro Nine"));
        assert_eq!(input.name.as_deref(), Some("Kim Lee"));
        assert_eq!(input.email.as_deref(), Some("kim@bistronine.example"));
        assert_eq!(input.phone_number.as_deref(), Some("2345678900"));
        assert_eq!(input.sales_rep_slack_id.as_deref(), Some("U12345678"));
    }

    #[test]
    fn missing_enrichment_leaves_fields_empty() {
        let input = assemble_input(&deal(), &DealEnrichment::default(), None);
        assert_eq!(input.restaurant_name, None);
        assert_eq!(input.name, None);
        assert_eq!(input.email, None);
        assert_eq!(input.phone_number, None);
        assert_eq!(input.sales_rep_slack_id, None);
        // Price still derives from the deal itself.
        assert_eq!(input.price, 9900);
    }
}
