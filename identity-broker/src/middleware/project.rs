//! `X-Project-Ids` request scoping.

use service_core::axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;

pub const PROJECT_IDS_HEADER: &str = "x-project-ids";

/// Projects the caller scoped this request to. Empty when the header is
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectScope(pub Vec<String>);

impl ProjectScope {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.0.iter().any(|id| id == project_id)
    }
}

pub async fn project_scope_middleware(mut req: Request, next: Next) -> Response {
    let scope = req
        .headers()
        .get(PROJECT_IDS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ProjectScope::parse)
        .unwrap_or_default();

    req.extensions_mut().insert(scope);
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for ProjectScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ProjectScope>()
            .cloned()
            .unwrap_or_default())
    }
}
