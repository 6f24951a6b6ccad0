use service_core::{
    axum::{
        async_trait,
        extract::{FromRequestParts, Request, State},
        http::{header, request::Parts},
        middleware::Next,
        response::Response,
    },
    error::AppError,
};

use crate::{services::ResolvedIdentity, AppState};

/// Resolve the bearer token into an identity for protected routes.
///
/// Until a bootstrap client exists nothing can issue tokens, so requests
/// pass through without an identity.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.enforcement.is_enforced() {
        tracing::warn!(
            path = %req.uri().path(),
            "Authentication not enforced yet, passing request through without identity"
        );
        return Ok(next.run(req).await);
    }

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let identity = state.resolver.resolve(authorization).await.map_err(|e| {
        tracing::debug!(error = %e, "Rejected request identity");
        AppError::from(e)
    })?;

    tracing::debug!(user_id = %identity.user.id, "Request identity resolved");
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Extractor for the identity attached by [`identity_middleware`].
pub struct AuthUser(pub ResolvedIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Authentication required")))
    }
}
