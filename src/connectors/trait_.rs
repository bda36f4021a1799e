//! Connector trait definition
//!
//! Defines the provider capability interface the token manager, the sync
//! reconciler and the HTTP handlers call into. Each mail provider supplies
//! one adapter implementing [`MailConnector`].

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use url::Url;

use super::aurinko::AurinkoMessage;
use super::gmail::GmailMessage;

/// Failures surfaced by provider adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// The access token was rejected (HTTP 401)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The refresh token or authorization code was rejected
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// The provider's mail API is not enabled for this credential
    #[error("mail API disabled: {0}")]
    ApiDisabled(String),

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ConnectorError {
    /// Classify a transport-level reqwest failure.
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectorError::Timeout
        } else {
            ConnectorError::Network(format!("{}: {}", context, err))
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::RateLimited { .. }
                | ConnectorError::Timeout
                | ConnectorError::Network(_)
                | ConnectorError::Http { status: 500..=599, .. }
        )
    }
}

/// Token material returned by a code exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the provider did not rotate the refresh token
    pub refresh_token: Option<String>,
    /// Lifetime in seconds as reported by the provider
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Absolute expiry instant relative to `now`, if the provider reported one.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Identity of the mailbox behind an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountProfile {
    pub provider_account_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub max_results: u32,
    pub page_token: Option<String>,
}

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessageListing {
    pub messages: Vec<RawMessage>,
    pub next_page_token: Option<String>,
}

/// An outgoing message as handed to a provider's send API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

/// A provider message payload, either a listing entry or fully fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Gmail(GmailMessage),
    Aurinko(AurinkoMessage),
}

impl RawMessage {
    /// Provider message id.
    pub fn id(&self) -> &str {
        match self {
            RawMessage::Gmail(m) => &m.id,
            RawMessage::Aurinko(m) => &m.id,
        }
    }
}

/// Provider capability interface.
#[async_trait]
pub trait MailConnector: Send + Sync {
    /// Stable provider id used in routes and the `linked_accounts.provider` column
    fn provider(&self) -> &'static str;

    /// Build the URL the user is redirected to for consent
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, ConnectorError>;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ConnectorError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ConnectorError>;

    async fn account_profile(&self, access_token: &str) -> Result<AccountProfile, ConnectorError>;

    async fn list_messages(
        &self,
        access_token: &str,
        params: ListParams,
    ) -> Result<MessageListing, ConnectorError>;

    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, ConnectorError>;

    /// Fetch full content for a set of listing entries.
    ///
    /// The outer error aborts the whole fetch; inner errors are per message
    /// and line up with `listed` by index. `call_timeout` bounds each network
    /// request the adapter makes, not the fetch as a whole.
    async fn fetch_messages(
        &self,
        access_token: &str,
        listed: &[RawMessage],
        call_timeout: StdDuration,
    ) -> Result<Vec<Result<RawMessage, ConnectorError>>, ConnectorError> {
        Ok(fetch_each(self, access_token, listed, call_timeout).await)
    }

    async fn send_message(
        &self,
        access_token: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectorError>;
}

/// One `fetch_message` per entry, each under its own timeout.
///
/// A slow or failing message only costs its own slot.
pub async fn fetch_each<C>(
    connector: &C,
    access_token: &str,
    listed: &[RawMessage],
    call_timeout: StdDuration,
) -> Vec<Result<RawMessage, ConnectorError>>
where
    C: MailConnector + ?Sized,
{
    let mut out = Vec::with_capacity(listed.len());
    for entry in listed {
        let result = tokio::time::timeout(
            call_timeout,
            connector.fetch_message(access_token, entry.id()),
        )
        .await
        .unwrap_or(Err(ConnectorError::Timeout));
        out.push(result);
    }
    out
}
