//! Federated identities as seen by the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity returned by an upstream provider after a code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    pub provider_id: String,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Resolved identity, created on first federation and read on every
/// authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub provider_id: String,
    pub provider_subject: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn from_federated(identity: &FederatedIdentity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            provider_id: identity.provider_id.clone(),
            provider_subject: identity.subject.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh profile attributes from a later federation of the same subject.
    pub fn apply(&mut self, identity: &FederatedIdentity) {
        if identity.name.is_some() {
            self.name = identity.name.clone();
        }
        if identity.email.is_some() {
            self.email = identity.email.clone();
        }
        self.updated_at = Utc::now();
    }
}
