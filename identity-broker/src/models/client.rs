use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation/modification bookkeeping carried by registry-owned entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl AuditMetadata {
    pub fn new(created_by: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            created_by,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A registered application allowed to start broker flows.
///
/// `secret_encrypted` is the output of [`crate::services::SecretCipher::encrypt`];
/// the plaintext secret never leaves the cipher boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_encrypted: String,
    pub redirect_urls: Vec<String>,
    pub scopes: Vec<String>,
    pub project_id: String,
    pub default_auth_provider_id: Option<String>,
    /// The IAM system's own bootstrap client. Its existence switches the
    /// broker from "no auth configured" to "auth enforced".
    pub is_bootstrap: bool,
    pub enabled: bool,
    pub audit: AuditMetadata,
}

impl Client {
    pub fn new(
        id: String,
        name: String,
        secret_encrypted: String,
        redirect_urls: Vec<String>,
        project_id: String,
    ) -> Self {
        Self {
            id,
            name,
            secret_encrypted,
            redirect_urls,
            scopes: Vec::new(),
            project_id,
            default_auth_provider_id: None,
            is_bootstrap: false,
            enabled: true,
            audit: AuditMetadata::new(None),
        }
    }

    /// Exact-match membership against the registered redirect set.
    pub fn allows_redirect(&self, redirect_url: &str) -> bool {
        self.redirect_urls.iter().any(|url| url == redirect_url)
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}
