use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::broker::{CallbackRequest, LoginRequest};

// Absent parameters deserialize to empty strings so they are reported
// through validation in the standard envelope.

#[derive(Debug, Deserialize, Validate)]
pub struct LoginQuery {
    #[serde(default)]
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    pub auth_provider: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "redirect_url is required"))]
    pub redirect_url: String,

    #[serde(default)]
    pub postback: bool,

    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl From<LoginQuery> for LoginRequest {
    fn from(q: LoginQuery) -> Self {
        Self {
            client_id: q.client_id,
            auth_provider: q.auth_provider,
            state: q.state,
            redirect_url: q.redirect_url,
            code_challenge: q.code_challenge,
            code_challenge_method: q.code_challenge_method,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CallbackQuery {
    pub code: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    #[serde(default)]
    pub postback: bool,

    /// Set by the provider when the user denied access or the request failed.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl From<CallbackQuery> for CallbackRequest {
    fn from(q: CallbackQuery) -> Self {
        let error = q.error.map(|e| match q.error_description {
            Some(desc) if !desc.is_empty() => format!("{}: {}", e, desc),
            _ => e,
        });
        Self {
            code: q.code,
            state: q.state,
            client_id: q.client_id,
            error,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyQuery {
    #[serde(default)]
    #[validate(length(min = 1, message = "code is required"))]
    pub code: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    #[serde(alias = "code_challenge")]
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub login_url: String,
}

#[derive(Debug, Serialize)]
pub struct RedirectData {
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub auth_enforced: bool,
}
