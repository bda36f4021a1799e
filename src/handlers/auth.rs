//! # Account Linking Handlers
//!
//! OAuth authorization for mail providers. The callback exchanges the code,
//! identifies the mailbox owner and stores the encrypted token pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::connectors::{ConnectorError, MailConnector};
use crate::crypto::{self, CryptoKey};
use crate::error::{self, ApiError};
use crate::repositories::{LinkedAccountRepository, NewLinkedAccount, UserRepository};
use crate::server::AppState;
use crate::sync::SyncError;

/// How long an issued `state` value stays redeemable.
const STATE_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
struct PendingAuthorization {
    provider: String,
    issued_at: DateTime<Utc>,
}

/// Outstanding OAuth `state` values, each redeemable once.
#[derive(Debug, Clone, Default)]
pub struct PendingAuthorizations {
    inner: Arc<Mutex<HashMap<String, PendingAuthorization>>>,
}

impl PendingAuthorizations {
    /// Issue a fresh random state for `provider`.
    pub fn issue(&self, provider: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now();
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        table.retain(|_, pending| now - pending.issued_at < Duration::minutes(STATE_TTL_MINUTES));
        table.insert(
            state.clone(),
            PendingAuthorization {
                provider: provider.to_string(),
                issued_at: now,
            },
        );
        state
    }

    /// Redeem `state` for `provider`. Unknown, expired, or mismatched values
    /// are rejected; a redeemed value cannot be used again.
    pub fn redeem(&self, state: &str, provider: &str) -> bool {
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match table.remove(state) {
            Some(pending) => {
                pending.provider == provider
                    && Utc::now() - pending.issued_at < Duration::minutes(STATE_TTL_MINUTES)
            }
            None => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeUrlResponse {
    /// Provider consent page to redirect the user to
    pub authorize_url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied consent
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkedAccountResponse {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub email: String,
}

fn resolve_connector(state: &AppState, provider: &str) -> Result<Arc<dyn MailConnector>, ApiError> {
    state
        .registry
        .get(provider)
        .map_err(|_| error::not_found(&format!("provider '{}' not found", provider)))
}

/// Start the OAuth flow for a provider
#[utoipa::path(
    get,
    path = "/auth/{provider}",
    params(("provider" = String, Path, description = "Provider id, e.g. 'google' or 'aurinko'")),
    responses(
        (status = 200, description = "Authorization URL issued", body = AuthorizeUrlResponse),
        (status = 404, description = "Unknown provider", body = ApiError),
        (status = 500, description = "Provider is not configured", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn start_authorization(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<AuthorizeUrlResponse>, ApiError> {
    let connector = resolve_connector(&state, &provider)?;
    let oauth_state = state.pending_auth.issue(&provider);
    let redirect_uri = state.config.redirect_uri(&provider);

    let url = connector
        .authorize_url(&redirect_uri, &oauth_state)
        .map_err(|e| error::internal(&format!("authorize URL for {}: {}", provider, e)))?;

    info!(provider = %provider, "OAuth flow initiated");
    Ok(Json(AuthorizeUrlResponse {
        authorize_url: url.to_string(),
    }))
}

/// Complete the OAuth flow and link the mailbox
#[utoipa::path(
    get,
    path = "/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider id"),
        CallbackQuery
    ),
    responses(
        (status = 200, description = "Account linked", body = LinkedAccountResponse),
        (status = 400, description = "Missing code, consent denied, or invalid state", body = ApiError),
        (status = 404, description = "Unknown provider", body = ApiError),
        (status = 502, description = "Provider rejected the exchange", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn authorization_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<LinkedAccountResponse>, ApiError> {
    if let Some(denied) = query.error {
        warn!(provider = %provider, error = %denied, "Provider returned an authorization error");
        return Err(error::bad_request(&format!("authorization failed: {}", denied)));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| error::bad_request("missing authorization code"))?;
    let oauth_state = query
        .state
        .ok_or_else(|| error::bad_request("missing state"))?;

    let connector = resolve_connector(&state, &provider)?;
    if !state.pending_auth.redeem(&oauth_state, &provider) {
        return Err(error::bad_request("invalid or expired state"));
    }

    let redirect_uri = state.config.redirect_uri(&provider);
    let grant = connector
        .exchange_code(&code, &redirect_uri)
        .await
        .map_err(|e| exchange_error(&provider, e))?;
    let profile = connector
        .account_profile(&grant.access_token)
        .await
        .map_err(|e| exchange_error(&provider, e))?;

    let users = UserRepository::new(state.db.clone());
    let user = users
        .upsert_by_email(&profile.email, profile.name.as_deref())
        .await?;

    let (access_ciphertext, refresh_ciphertext) = encrypt_grant(
        &state.crypto_key,
        &crypto::token_aad(&provider, &profile.provider_account_id),
        &grant.access_token,
        grant.refresh_token.as_deref(),
    )?;

    let accounts = LinkedAccountRepository::new(state.db.clone());
    let account = accounts
        .upsert(NewLinkedAccount {
            user_id: user.id,
            provider: provider.clone(),
            provider_account_id: profile.provider_account_id.clone(),
            email: profile.email.clone(),
            access_token_ciphertext: access_ciphertext,
            refresh_token_ciphertext: refresh_ciphertext,
            expires_at: grant.expires_at(Utc::now()),
        })
        .await?;

    info!(
        provider = %provider,
        account_id = %account.id,
        user_id = %user.id,
        has_refresh_token = grant.refresh_token.is_some(),
        "Mailbox linked"
    );

    Ok(Json(LinkedAccountResponse {
        account_id: account.id,
        user_id: user.id,
        provider,
        email: account.email,
    }))
}

fn encrypt_grant(
    key: &CryptoKey,
    aad: &str,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<(Vec<u8>, Option<Vec<u8>>), ApiError> {
    let encrypt = |token: &str| {
        crypto::encrypt_token(key, aad, token)
            .map_err(|e| error::internal(&format!("token encryption failed: {}", e)))
    };
    Ok((encrypt(access_token)?, refresh_token.map(encrypt).transpose()?))
}

fn exchange_error(provider: &str, err: ConnectorError) -> ApiError {
    match err {
        ConnectorError::InvalidGrant(detail) => {
            error::bad_request(&format!("authorization code rejected: {}", detail))
        }
        disabled @ ConnectorError::ApiDisabled(_) => SyncError::from(disabled).into(),
        other => error::provider_error(provider, &other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_single_use() {
        let pending = PendingAuthorizations::default();
        let state = pending.issue("google");
        assert!(pending.redeem(&state, "google"));
        assert!(!pending.redeem(&state, "google"));
    }

    #[test]
    fn test_state_bound_to_provider() {
        let pending = PendingAuthorizations::default();
        let state = pending.issue("google");
        assert!(!pending.redeem(&state, "aurinko"));
        // a mismatched attempt still consumes it
        assert!(!pending.redeem(&state, "google"));
    }

    #[test]
    fn test_states_are_unique_and_url_safe() {
        let pending = PendingAuthorizations::default();
        let a = pending.issue("google");
        let b = pending.issue("google");
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let pending = PendingAuthorizations::default();
        assert!(!pending.redeem("forged", "google"));
    }
}
