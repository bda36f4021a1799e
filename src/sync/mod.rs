//! # Mail synchronization
//!
//! [`Reconciler`] merges one page of remote messages into local storage;
//! [`SyncService`] wraps it with account lookup, per-account locking, token
//! retrieval and metrics.

pub mod bounded;
pub mod reconciler;
pub mod service;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::ConnectorError;
use crate::token_manager::TokenError;

pub use bounded::run_bounded;
pub use reconciler::{Reconciler, SyncSettings};
pub use service::SyncService;

/// Counts reported by one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncOutcome {
    /// Emails written (or confirmed unchanged) this run
    pub synced_count: usize,
    pub threads_upserted: usize,
    /// Messages dropped because they could not be parsed
    pub skipped_normalization: usize,
    /// Emails dropped because a thread or email write failed
    pub skipped_storage: usize,
    /// Messages stored from their listing entry after a failed fetch
    pub fetch_fallbacks: usize,
}

/// Run-level sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("re-authentication required: {0}")]
    ReauthRequired(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The provider rejected the access token
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("mail API disabled: {0}")]
    ApiDisabled(String),

    #[error("linked account {0} not found")]
    AccountNotFound(Uuid),

    #[error("no connector registered for provider '{0}'")]
    UnsupportedProvider(String),

    #[error("internal sync failure: {0}")]
    Internal(String),
}

impl SyncError {
    /// The user has to reconnect the account before syncing again.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            SyncError::ReauthRequired(_) | SyncError::RefreshFailed(_) | SyncError::Unauthorized(_)
        )
    }

    /// Retrying the whole run later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ProviderUnavailable(_) | SyncError::RefreshFailed(_)
        )
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::ReauthRequired(_) => "reauth_required",
            SyncError::RefreshFailed(_) => "refresh_failed",
            SyncError::Unauthorized(_) => "unauthorized",
            SyncError::ProviderUnavailable(_) => "provider_unavailable",
            SyncError::ApiDisabled(_) => "api_disabled",
            SyncError::AccountNotFound(_) => "account_not_found",
            SyncError::UnsupportedProvider(_) => "unsupported_provider",
            SyncError::Internal(_) => "internal",
        }
    }
}

impl From<ConnectorError> for SyncError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Unauthorized(detail) | ConnectorError::InvalidGrant(detail) => {
                SyncError::Unauthorized(detail)
            }
            ConnectorError::ApiDisabled(detail) => SyncError::ApiDisabled(detail),
            other => SyncError::ProviderUnavailable(other.to_string()),
        }
    }
}

impl From<TokenError> for SyncError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::ReauthRequired(detail) => SyncError::ReauthRequired(detail),
            TokenError::RefreshFailed(detail) => SyncError::RefreshFailed(detail),
            TokenError::UnsupportedProvider(provider) => SyncError::UnsupportedProvider(provider),
            other => SyncError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_errors_map_to_run_errors() {
        assert!(matches!(
            SyncError::from(ConnectorError::Unauthorized("401".into())),
            SyncError::Unauthorized(_)
        ));
        assert!(matches!(
            SyncError::from(ConnectorError::ApiDisabled("off".into())),
            SyncError::ApiDisabled(_)
        ));
        for transient in [
            ConnectorError::Timeout,
            ConnectorError::RateLimited {
                retry_after_secs: Some(3),
            },
            ConnectorError::Network("reset".into()),
            ConnectorError::Http {
                status: 503,
                body: String::new(),
            },
        ] {
            assert!(matches!(
                SyncError::from(transient),
                SyncError::ProviderUnavailable(_)
            ));
        }
    }

    #[test]
    fn test_reauth_and_retry_flags() {
        assert!(SyncError::ReauthRequired("x".into()).needs_reauth());
        assert!(SyncError::RefreshFailed("x".into()).needs_reauth());
        assert!(SyncError::Unauthorized("x".into()).needs_reauth());
        assert!(!SyncError::ApiDisabled("x".into()).needs_reauth());
        assert!(!SyncError::ApiDisabled("x".into()).is_retryable());
        assert!(SyncError::ProviderUnavailable("x".into()).is_retryable());
        assert!(!SyncError::ProviderUnavailable("x".into()).needs_reauth());
    }

    #[test]
    fn test_token_errors_map_to_run_errors() {
        assert!(matches!(
            SyncError::from(TokenError::ReauthRequired("x".into())),
            SyncError::ReauthRequired(_)
        ));
        assert!(matches!(
            SyncError::from(TokenError::Storage(anyhow::anyhow!("db down"))),
            SyncError::Internal(_)
        ));
    }
}
