use service_core::{
    axum::{
        extract::{Query, State},
        http::{header, HeaderMap},
        response::{IntoResponse, Redirect, Response},
        Json,
    },
    error::AppError,
};
use validator::Validate;

use crate::{
    dtos::{
        broker::{CallbackQuery, LoginData, LoginQuery, RedirectData, StatusData, VerifyQuery},
        ApiResponse,
    },
    services::{broker::VerifyRequest, BrokerError, ClientCredentials},
    AppState,
};

/// GET /auth/v1/login
#[tracing::instrument(skip(state, query), fields(client_id = %query.client_id))]
pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    query.validate()?;
    let postback = query.postback;

    let login_url = state.broker.login(query.into()).await?;

    if postback {
        Ok(Json(ApiResponse::ok("Login URL generated", LoginData { login_url })).into_response())
    } else {
        Ok(Redirect::temporary(&login_url).into_response())
    }
}

/// GET /auth/v1/authp-callback
#[tracing::instrument(skip(state, query), fields(client_id = %query.client_id))]
pub async fn authp_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    // A provider-reported error wins over missing parameters.
    if query.error.is_none() {
        query.validate()?;
    }
    let postback = query.postback;

    let redirect_url = state.broker.callback(query.into()).await?;

    if postback {
        Ok(Json(ApiResponse::ok(
            "Authorization code issued",
            RedirectData { redirect_url },
        ))
        .into_response())
    } else {
        Ok(Redirect::temporary(&redirect_url).into_response())
    }
}

/// GET /auth/v1/verify
#[tracing::instrument(skip(state, headers, query), fields(client_id = %query.client_id))]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> Result<Response, AppError> {
    query.validate()?;

    let authorization = match headers.get(header::AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("Authorization header is not valid ASCII"))
        })?),
        None => None,
    };
    let credentials =
        ClientCredentials::from_request(authorization, query.code_verifier.as_deref())
            .map_err(BrokerError::from)?;

    let token = state
        .broker
        .verify(VerifyRequest {
            code: query.code,
            client_id: query.client_id,
            credentials,
        })
        .await?;

    Ok(Json(ApiResponse::ok("Token issued", token)).into_response())
}

/// GET /auth/v1/status
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(
        "Broker status",
        StatusData {
            auth_enforced: state.enforcement.is_enforced(),
        },
    ))
}
