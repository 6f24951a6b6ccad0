use serde::{Deserialize, Serialize};

use super::AuditMetadata;

/// Configuration of a federated identity source, owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthProvider {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Client id issued to the broker by the provider.
    pub client_id: String,
    /// Provider-issued secret, encrypted with the broker's cipher.
    pub client_secret_encrypted: String,
    pub scopes: Vec<String>,
    pub audit: AuditMetadata,
}
