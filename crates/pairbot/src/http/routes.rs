//! API handlers.

use axum::{extract::State, Json};

use crate::api::{
    OkResponse, PairParams, PairResponse, SessionParams, SessionsResponse, StartResponse,
};
use crate::http::extract::{ApiBody, ApiError};
use crate::http::AppState;

/// `POST /api/pair`
pub async fn pair(
    State(state): State<AppState>,
    ApiBody(params): ApiBody<PairParams>,
) -> Result<Json<PairResponse>, ApiError> {
    let issued = state
        .control
        .pair(params.phone.as_deref(), params.session_id.as_deref())
        .await?;
    Ok(Json(PairResponse {
        ok: true,
        code: issued.code,
        session_id: issued.session_id.to_string(),
    }))
}

/// `POST /api/start`
pub async fn start(
    State(state): State<AppState>,
    ApiBody(params): ApiBody<SessionParams>,
) -> Result<Json<StartResponse>, ApiError> {
    let session_id = state.control.start(params.session_id.as_deref()).await?;
    Ok(Json(StartResponse {
        ok: true,
        session_id: session_id.to_string(),
    }))
}

/// `POST /api/logout`
pub async fn logout(
    State(state): State<AppState>,
    ApiBody(params): ApiBody<SessionParams>,
) -> Result<Json<OkResponse>, ApiError> {
    state.control.logout(params.session_id.as_deref()).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// `GET /api/sessions`
pub async fn sessions(State(state): State<AppState>) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state.control.list().await?;
    Ok(Json(SessionsResponse { ok: true, sessions }))
}
