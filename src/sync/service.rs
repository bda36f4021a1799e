//! Sync orchestration for a single linked account.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{Reconciler, SyncError, SyncOutcome};
use crate::connectors::Registry;
use crate::token_manager::{AccountLocks, TokenManager, TokenStore};

/// Runs the reconciler for one account at a time.
///
/// The account's lock is held from token retrieval through the end of the
/// reconcile run, so overlapping requests for the same account queue up.
pub struct SyncService {
    accounts: Arc<dyn TokenStore>,
    tokens: Arc<TokenManager>,
    registry: Arc<Registry>,
    reconciler: Reconciler,
    locks: AccountLocks,
}

impl SyncService {
    pub fn new(
        accounts: Arc<dyn TokenStore>,
        tokens: Arc<TokenManager>,
        registry: Arc<Registry>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            accounts,
            tokens,
            registry,
            reconciler,
            locks: AccountLocks::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn sync_account(&self, account_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let _guard = self.locks.lock(account_id).await;

        let account = self
            .accounts
            .load_account(account_id)
            .await
            .map_err(|e| SyncError::Internal(format!("{:#}", e)))?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        let provider = account.provider.clone();

        let result = async {
            let connector = self
                .registry
                .get(&account.provider)
                .map_err(|_| SyncError::UnsupportedProvider(account.provider.clone()))?;
            let access_token = self.tokens.get_valid_access_token(&account).await?;
            self.reconciler
                .sync(&account, connector.as_ref(), &access_token)
                .await
        }
        .await;

        match &result {
            Ok(outcome) => {
                info!(provider = %provider, synced = outcome.synced_count, "Account sync finished");
                counter!("mailsync_sync_runs_total", "provider" => provider, "outcome" => "success")
                    .increment(1);
            }
            Err(err) => {
                warn!(
                    provider = %provider,
                    error = %err,
                    needs_reauth = err.needs_reauth(),
                    retryable = err.is_retryable(),
                    "Account sync failed"
                );
                counter!("mailsync_sync_runs_total", "provider" => provider, "outcome" => err.kind())
                    .increment(1);
            }
        }
        result
    }
}
