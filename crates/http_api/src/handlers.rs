use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{errors::HttpError, state::HttpState};

pub async fn greeting() -> &'static str {
    "Hello from data-usage-api."
}

pub async fn current_usage(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let record = state.app_state.services.usage.current(&username).await?;
    Ok(Json(record))
}

pub async fn usage_history(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let records = state.app_state.services.usage.history(&username).await?;
    Ok(Json(records))
}

pub async fn update_usage(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let record = state.app_state.services.reconcile.user(&username).await?;
    Ok(Json(record))
}

pub async fn not_found() -> HttpError {
    HttpError::new(
        StatusCode::NOT_FOUND,
        "no such route",
        Some("not_found".to_string()),
    )
}
