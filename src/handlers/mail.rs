//! # Mailbox Handlers
//!
//! Sync trigger, thread listing and reading, folder counts and sending.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::connectors::OutgoingMessage;
use crate::error::{self, ApiError};
use crate::models::{Folder, email, thread};
use crate::repositories::thread::DEFAULT_THREAD_LIMIT;
use crate::repositories::{FolderCounts, ThreadRepository};
use crate::server::AppState;
use crate::sync::SyncOutcome;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SyncRequest {
    pub account_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ThreadsQuery {
    pub user_id: Uuid,
    /// INBOX, SENT, DRAFTS or TRASH; anything else lists all folders
    pub folder: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailView {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub body_html: Option<String>,
    pub is_read: bool,
    pub sent_at: DateTime<Utc>,
}

impl From<email::Model> for EmailView {
    fn from(model: email::Model) -> Self {
        Self {
            id: model.id,
            from: model.from_addr,
            to: model.to_addrs,
            subject: model.subject,
            body: model.body,
            body_html: model.body_html,
            is_read: model.is_read,
            sent_at: model.sent_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub folder: Folder,
    pub last_message_at: DateTime<Utc>,
    /// The latest email only
    pub emails: Vec<EmailView>,
}

impl ThreadSummary {
    fn new(thread: thread::Model, emails: Vec<EmailView>) -> Self {
        Self {
            id: thread.id,
            external_id: thread.external_id,
            subject: thread.subject,
            snippet: thread.snippet,
            folder: thread.folder,
            last_message_at: thread.last_message_at.with_timezone(&Utc),
            emails,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ThreadsResponse {
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ThreadDetail {
    pub thread: ThreadSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub success: bool,
    /// Emails that changed from unread to read
    pub updated: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub struct FolderCountsResponse {
    pub inbox: u64,
    pub sent: u64,
    pub drafts: u64,
    pub trash: u64,
}

impl From<FolderCounts> for FolderCountsResponse {
    fn from(counts: FolderCounts) -> Self {
        Self {
            inbox: counts.inbox,
            sent: counts.sent,
            drafts: counts.drafts,
            trash: counts.trash,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendRequest {
    pub account_id: Uuid,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SendResponse {
    pub success: bool,
}

/// Sync one page of remote mail for a linked account
#[utoipa::path(
    post,
    path = "/mail/sync",
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Sync completed (possibly with skipped records)", body = SyncResponse),
        (status = 401, description = "Account must be reconnected", body = ApiError),
        (status = 403, description = "Mail API disabled for the provider project", body = ApiError),
        (status = 404, description = "Linked account not found", body = ApiError),
        (status = 502, description = "Provider unavailable", body = ApiError)
    ),
    tag = "mail"
)]
pub async fn sync_account(
    State(state): State<AppState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome = state.sync.sync_account(request.account_id).await?;
    Ok(Json(SyncResponse {
        success: true,
        outcome,
    }))
}

/// Most recent threads, optionally filtered by folder
#[utoipa::path(
    get,
    path = "/mail/threads",
    params(ThreadsQuery),
    responses(
        (status = 200, description = "Up to 50 threads, newest first, each with its latest email", body = ThreadsResponse),
        (status = 400, description = "Invalid query", body = ApiError)
    ),
    tag = "mail"
)]
pub async fn list_threads(
    State(state): State<AppState>,
    query: Result<Query<ThreadsQuery>, QueryRejection>,
) -> Result<Json<ThreadsResponse>, ApiError> {
    let Query(query) = query?;
    let folder = query.folder.as_deref().and_then(|f| f.parse::<Folder>().ok());

    let threads = ThreadRepository::new(state.db.clone())
        .list_by_folder(&query.user_id, folder, DEFAULT_THREAD_LIMIT)
        .await?
        .into_iter()
        .map(|entry| {
            let emails = entry.latest_email.map(EmailView::from).into_iter().collect();
            ThreadSummary::new(entry.thread, emails)
        })
        .collect();

    Ok(Json(ThreadsResponse { threads }))
}

/// One thread with all of its emails, oldest first
#[utoipa::path(
    get,
    path = "/mail/threads/{id}",
    params(("id" = Uuid, Path, description = "Thread id"), UserQuery),
    responses(
        (status = 200, description = "Thread with emails", body = ThreadDetail),
        (status = 404, description = "Thread not found", body = ApiError)
    ),
    tag = "mail"
)]
pub async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<ThreadDetail>, ApiError> {
    let Query(query) = query?;
    let (thread, emails) = ThreadRepository::new(state.db.clone())
        .get_with_emails(&query.user_id, &thread_id)
        .await?
        .ok_or_else(|| error::not_found(&format!("thread {} not found", thread_id)))?;

    Ok(Json(ThreadDetail {
        thread: ThreadSummary::new(thread, emails.into_iter().map(EmailView::from).collect()),
    }))
}

/// Mark every email in a thread as read
#[utoipa::path(
    post,
    path = "/mail/threads/{id}/read",
    params(("id" = Uuid, Path, description = "Thread id"), UserQuery),
    responses(
        (status = 200, description = "Thread marked read", body = MarkReadResponse),
        (status = 404, description = "Thread not found", body = ApiError)
    ),
    tag = "mail"
)]
pub async fn mark_thread_read(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let Query(query) = query?;
    let updated = ThreadRepository::new(state.db.clone())
        .mark_read(&query.user_id, &thread_id)
        .await?
        .ok_or_else(|| error::not_found(&format!("thread {} not found", thread_id)))?;

    Ok(Json(MarkReadResponse {
        success: true,
        updated,
    }))
}

/// Thread count per folder
#[utoipa::path(
    get,
    path = "/mail/folders/counts",
    params(UserQuery),
    responses(
        (status = 200, description = "Counts keyed by folder", body = FolderCountsResponse)
    ),
    tag = "mail"
)]
pub async fn folder_counts(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<FolderCountsResponse>, ApiError> {
    let Query(query) = query?;
    let counts = ThreadRepository::new(state.db.clone())
        .folder_counts(&query.user_id)
        .await?;
    Ok(Json(counts.into()))
}

/// Send a message through a linked account
#[utoipa::path(
    post,
    path = "/mail/send",
    request_body = SendRequest,
    responses(
        (status = 200, description = "Message accepted by the provider", body = SendResponse),
        (status = 400, description = "Missing recipient", body = ApiError),
        (status = 401, description = "Account must be reconnected", body = ApiError),
        (status = 404, description = "Linked account not found", body = ApiError),
        (status = 502, description = "Provider unavailable", body = ApiError)
    ),
    tag = "mail"
)]
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(request) = payload?;
    if request.to.trim().is_empty() {
        return Err(error::bad_request("Missing required field: to"));
    }

    let message = OutgoingMessage {
        to: request.to,
        subject: request.subject,
        body: request.body,
        thread_id: request.thread_id,
        in_reply_to: request.in_reply_to,
        references: request.references,
    };
    state.mail.send(request.account_id, message).await?;
    info!(account_id = %request.account_id, "Send request completed");

    Ok(Json(SendResponse { success: true }))
}
