use service_core::error::AppError;
use thiserror::Error;

use crate::services::cipher::CipherError;
use crate::services::claims::TokenError;
use crate::services::credentials::CredentialsError;
use crate::services::provider::ProviderError;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Client is disabled: {0}")]
    ClientDisabled(String),

    #[error("Auth provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Redirect URL is not registered for this client")]
    RedirectNotAllowed,

    #[error("A login with this state is already in progress")]
    DuplicateState,

    #[error("Unsupported code_challenge_method: {0}")]
    InvalidPkceMethod(String),

    #[error("State does not match a pending login")]
    StateMismatch,

    #[error("Provider reported an error: {0}")]
    ProviderDenied(String),

    #[error("Provider exchange failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid client credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Credentials do not belong to client {0}")]
    ClientMismatch(String),

    #[error("Invalid client credentials")]
    SecretMismatch,

    #[error("Stored client secret could not be decrypted: {0}")]
    Crypto(#[from] CipherError),

    #[error("code_verifier required")]
    PkceRequired,

    #[error("code_verifier does not match the code challenge")]
    PkceMismatch,

    #[error("Invalid authorization code: {0}")]
    InvalidGrant(&'static str),

    #[error("Failed to issue token: {0}")]
    Token(#[from] TokenError),

    #[error("Failed to build URL: {0}")]
    Url(String),

    #[error("Registry error: {0}")]
    Registry(#[from] anyhow::Error),
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        let message = err.to_string();
        match err {
            BrokerError::MissingParameter(_)
            | BrokerError::RedirectNotAllowed
            | BrokerError::DuplicateState
            | BrokerError::InvalidPkceMethod(_)
            | BrokerError::StateMismatch
            | BrokerError::Credentials(_)
            | BrokerError::ClientMismatch(_)
            | BrokerError::SecretMismatch
            | BrokerError::PkceRequired
            | BrokerError::PkceMismatch => AppError::BadRequest(anyhow::anyhow!(message)),
            BrokerError::ClientNotFound(_) | BrokerError::ProviderNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(message))
            }
            BrokerError::ClientDisabled(_) => AppError::AuthError(anyhow::anyhow!(message)),
            BrokerError::Crypto(e) => AppError::CryptoError(anyhow::Error::new(e)),
            BrokerError::ProviderDenied(_) | BrokerError::Provider(_) => {
                AppError::UpstreamError(anyhow::anyhow!(message))
            }
            BrokerError::InvalidGrant(_) | BrokerError::Token(_) | BrokerError::Url(_) => {
                AppError::InternalError(anyhow::anyhow!(message))
            }
            BrokerError::Registry(e) => AppError::InternalError(e),
        }
    }
}

/// Why a bearer token could not be turned into an identity.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Missing or invalid Authorization header")]
    MissingBearer,

    #[error("Invalid or expired token")]
    InvalidToken(#[from] TokenError),

    #[error("Token has no subject")]
    MissingSubject,

    #[error("Unknown subject")]
    UnknownSubject,

    #[error("Identity lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Lookup(e) => AppError::InternalError(e),
            other => AppError::AuthError(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn broker_errors_map_to_http_taxonomy() {
        let cases = vec![
            (BrokerError::MissingParameter("state"), StatusCode::BAD_REQUEST),
            (BrokerError::StateMismatch, StatusCode::BAD_REQUEST),
            (BrokerError::PkceMismatch, StatusCode::BAD_REQUEST),
            (BrokerError::ClientNotFound("c".into()), StatusCode::NOT_FOUND),
            (BrokerError::ClientDisabled("c".into()), StatusCode::UNAUTHORIZED),
            (
                BrokerError::Crypto(CipherError::Authentication),
                StatusCode::UNAUTHORIZED,
            ),
            (
                BrokerError::ProviderDenied("access_denied".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BrokerError::InvalidGrant("unknown"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let label = err.to_string();
            assert_eq!(AppError::from(err).status(), status, "{}", label);
        }
    }

    #[test]
    fn resolve_errors_are_unauthorized_except_lookup() {
        assert_eq!(
            AppError::from(ResolveError::UnknownSubject).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(ResolveError::Lookup(anyhow::anyhow!("down"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
