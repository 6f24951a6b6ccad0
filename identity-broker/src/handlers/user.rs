use serde::Serialize;
use service_core::axum::{response::IntoResponse, Json};

use crate::{
    dtos::ApiResponse,
    middleware::{AuthUser, ProjectScope},
    models::User,
};

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: User,
    pub client_id: Option<String>,
    pub project_ids: Vec<String>,
}

/// GET /auth/v1/me
pub async fn get_me(AuthUser(identity): AuthUser, scope: ProjectScope) -> impl IntoResponse {
    let client_id = identity
        .claims
        .get("client_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Json(ApiResponse::ok(
        "Current identity",
        MeData {
            user: identity.user,
            client_id,
            project_ids: scope.0,
        },
    ))
}
