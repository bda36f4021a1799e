//! # Token Manager
//!
//! Hands out a currently valid access token for a linked account, refreshing
//! it through the provider when the stored one has expired. Refreshed tokens
//! are encrypted and persisted before they are returned to the caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::connectors::{ConnectorError, Registry};
use crate::crypto::{self, CryptoError, CryptoKey};
use crate::models::linked_account;

/// Lifetime assumed when a provider omits `expires_in` on refresh.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum TokenError {
    /// The user must redo the authorization flow
    #[error("re-authentication required: {0}")]
    ReauthRequired(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("stored token unreadable: {0}")]
    Crypto(#[from] CryptoError),

    #[error("failed to persist refreshed token: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("no connector registered for provider '{0}'")]
    UnsupportedProvider(String),
}

/// Persistence for refreshed token material.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load_account(&self, account_id: Uuid) -> anyhow::Result<Option<linked_account::Model>>;

    /// `refresh_token_ciphertext = None` keeps the stored refresh token.
    async fn save_refreshed_tokens(
        &self,
        account_id: Uuid,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<linked_account::Model>;
}

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
#[derive(Debug)]
pub struct FixedClock(RwLock<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(RwLock::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-account async mutex table.
#[derive(Debug, Default, Clone)]
pub struct AccountLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `account_id`.
    pub async fn lock(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        self.slot(account_id).await.lock_owned().await
    }

    /// Take the lock only if nobody holds it.
    pub async fn try_lock(&self, account_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        self.slot(account_id).await.try_lock_owned().ok()
    }

    /// Number of slots currently tracked.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Slot for `account_id`, dropping idle slots of other accounts.
    ///
    /// A slot referenced only by the table has no holder and no waiter, and
    /// nobody can clone it while the table lock is held.
    async fn slot(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        let mut table = self.inner.lock().await;
        table.retain(|id, slot| *id == account_id || Arc::strong_count(slot) > 1);
        table.entry(account_id).or_default().clone()
    }
}

pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    registry: Arc<Registry>,
    crypto_key: CryptoKey,
    clock: Arc<dyn Clock>,
    refresh_timeout: StdDuration,
    refresh_locks: AccountLocks,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        registry: Arc<Registry>,
        crypto_key: CryptoKey,
        refresh_timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            registry,
            crypto_key,
            clock: Arc::new(SystemClock),
            refresh_timeout,
            refresh_locks: AccountLocks::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A missing expiry counts as valid; expiry is inclusive.
    pub fn is_expired(&self, account: &linked_account::Model) -> bool {
        match account.expires_at {
            None => false,
            Some(expires_at) => self.clock.now() > expires_at.with_timezone(&Utc),
        }
    }

    /// Return a valid access token for `account`, refreshing if it has expired.
    #[instrument(skip(self, account), fields(account_id = %account.id, provider = %account.provider))]
    pub async fn get_valid_access_token(
        &self,
        account: &linked_account::Model,
    ) -> Result<String, TokenError> {
        if !self.is_expired(account) {
            return self.decrypt_access(account);
        }

        if account.refresh_token_ciphertext.is_none() {
            warn!("Access token expired and no refresh token stored");
            counter!("mailsync_token_refresh_total", "outcome" => "reauth_required").increment(1);
            return Err(TokenError::ReauthRequired(
                "access token expired and no refresh token is available".to_string(),
            ));
        }

        let _guard = self.refresh_locks.lock(account.id).await;

        // Another caller may have refreshed while we waited for the lock.
        let current = match self.store.load_account(account.id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => account.clone(),
            Err(e) => return Err(TokenError::Storage(e)),
        };
        if !self.is_expired(&current) {
            debug!("Token already refreshed by a concurrent caller");
            return self.decrypt_access(&current);
        }

        self.refresh(&current).await
    }

    fn decrypt_access(&self, account: &linked_account::Model) -> Result<String, TokenError> {
        Ok(crypto::decrypt_token(
            &self.crypto_key,
            &account.token_aad(),
            &account.access_token_ciphertext,
        )?)
    }

    async fn refresh(&self, account: &linked_account::Model) -> Result<String, TokenError> {
        let Some(refresh_ciphertext) = account.refresh_token_ciphertext.as_deref() else {
            counter!("mailsync_token_refresh_total", "outcome" => "reauth_required").increment(1);
            return Err(TokenError::ReauthRequired(
                "access token expired and no refresh token is available".to_string(),
            ));
        };

        let aad = account.token_aad();
        let refresh_token = crypto::decrypt_token(&self.crypto_key, &aad, refresh_ciphertext)?;

        let connector = self
            .registry
            .get(&account.provider)
            .map_err(|_| TokenError::UnsupportedProvider(account.provider.clone()))?;

        let grant = match tokio::time::timeout(
            self.refresh_timeout,
            connector.refresh_token(&refresh_token),
        )
        .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(err)) => {
                let error = classify_refresh_error(err);
                let outcome = match error {
                    TokenError::ReauthRequired(_) => "reauth_required",
                    _ => "failed",
                };
                warn!(error = %error, "Token refresh rejected");
                counter!("mailsync_token_refresh_total", "outcome" => outcome).increment(1);
                return Err(error);
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.refresh_timeout.as_secs(),
                    "Token refresh timed out"
                );
                counter!("mailsync_token_refresh_total", "outcome" => "failed").increment(1);
                return Err(TokenError::RefreshFailed(
                    "token refresh timed out".to_string(),
                ));
            }
        };

        let now = self.clock.now();
        let lifetime = grant
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = now + Duration::seconds(lifetime);

        let access_ciphertext = crypto::encrypt_token(&self.crypto_key, &aad, &grant.access_token)?;
        let refresh_ciphertext = grant
            .refresh_token
            .as_deref()
            .map(|rt| crypto::encrypt_token(&self.crypto_key, &aad, rt))
            .transpose()?;

        self.store
            .save_refreshed_tokens(account.id, access_ciphertext, refresh_ciphertext, expires_at)
            .await
            .map_err(TokenError::Storage)?;

        info!(expires_at = %expires_at, rotated = grant.refresh_token.is_some(), "Access token refreshed");
        counter!("mailsync_token_refresh_total", "outcome" => "success").increment(1);

        Ok(grant.access_token)
    }
}

/// A rejected grant means the user must reconnect; anything else may be transient.
fn classify_refresh_error(err: ConnectorError) -> TokenError {
    match err {
        ConnectorError::InvalidGrant(detail) | ConnectorError::Unauthorized(detail) => {
            TokenError::ReauthRequired(format!("refresh token rejected: {}", detail))
        }
        other => TokenError::RefreshFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_classify_refresh_error() {
        assert!(matches!(
            classify_refresh_error(ConnectorError::InvalidGrant("revoked".into())),
            TokenError::ReauthRequired(_)
        ));
        assert!(matches!(
            classify_refresh_error(ConnectorError::Unauthorized("bad client".into())),
            TokenError::ReauthRequired(_)
        ));
        assert!(matches!(
            classify_refresh_error(ConnectorError::Timeout),
            TokenError::RefreshFailed(_)
        ));
        assert!(matches!(
            classify_refresh_error(ConnectorError::Http {
                status: 500,
                body: "oops".into()
            }),
            TokenError::RefreshFailed(_)
        ));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[tokio::test]
    async fn test_account_locks_are_exclusive_per_account() {
        let locks = AccountLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let held = locks.lock(a).await;
        assert!(locks.try_lock(a).await.is_none());
        assert!(locks.try_lock(b).await.is_some());

        drop(held);
        assert!(locks.try_lock(a).await.is_some());
    }

    #[tokio::test]
    async fn test_account_locks_drop_idle_slots() {
        let locks = AccountLocks::new();
        let held = locks.lock(Uuid::new_v4()).await;
        for _ in 0..10 {
            drop(locks.lock(Uuid::new_v4()).await);
        }
        // The held slot and the last one taken survive.
        assert_eq!(locks.len().await, 2);

        drop(held);
        drop(locks.lock(Uuid::new_v4()).await);
        assert_eq!(locks.len().await, 1);
    }
}
