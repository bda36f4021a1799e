//! # AI Helper Handlers

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ai::ReplySuggestion;
use crate::error::{self, ApiError};
use crate::normalization::NO_SUBJECT;
use crate::server::AppState;

const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Deserialize, ToSchema)]
pub struct SummarizeRequest {
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummarizeResponse {
    pub summary: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplySuggestionsRequest {
    pub subject: Option<String>,
    /// Sender shown to the model
    #[serde(alias = "sender")]
    pub from: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReplySuggestionsResponse {
    pub suggestions: Vec<ReplySuggestion>,
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn require_body(body: &str) -> Result<(), ApiError> {
    if body.trim().is_empty() {
        return Err(error::bad_request("Missing required field: body"));
    }
    Ok(())
}

/// Summarize an email in a few sentences
#[utoipa::path(
    post,
    path = "/ai/summarize",
    request_body = SummarizeRequest,
    responses(
        (status = 200, description = "Summary generated", body = SummarizeResponse),
        (status = 400, description = "Missing body", body = ApiError),
        (status = 502, description = "AI endpoint failed", body = ApiError)
    ),
    tag = "ai"
)]
pub async fn summarize(
    State(state): State<AppState>,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let Json(request) = payload?;
    require_body(&request.body)?;

    let subject = or_default(request.subject, NO_SUBJECT);
    let summary = state.ai.summarize(&subject, &request.body).await?;
    Ok(Json(SummarizeResponse { summary }))
}

/// Draft three short replies
#[utoipa::path(
    post,
    path = "/ai/reply-suggestions",
    request_body = ReplySuggestionsRequest,
    responses(
        (status = 200, description = "Suggestions, or the default set if the model failed", body = ReplySuggestionsResponse),
        (status = 400, description = "Missing body", body = ApiError)
    ),
    tag = "ai"
)]
pub async fn reply_suggestions(
    State(state): State<AppState>,
    payload: Result<Json<ReplySuggestionsRequest>, JsonRejection>,
) -> Result<Json<ReplySuggestionsResponse>, ApiError> {
    let Json(request) = payload?;
    require_body(&request.body)?;

    let subject = or_default(request.subject, NO_SUBJECT);
    let from = or_default(request.from, UNKNOWN_SENDER);
    let suggestions = state
        .ai
        .reply_suggestions(&subject, &from, &request.body)
        .await;
    Ok(Json(ReplySuggestionsResponse { suggestions }))
}
