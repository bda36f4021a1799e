//! Outgoing mail
//!
//! Composition helpers shared by the connectors, plus [`MailService`] which
//! sends through a linked account with a valid access token.

pub mod composer;

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::connectors::{OutgoingMessage, Registry};
use crate::sync::SyncError;
use crate::token_manager::{TokenManager, TokenStore};

pub use composer::{compose_rfc2822, encode_raw};

pub struct MailService {
    accounts: Arc<dyn TokenStore>,
    tokens: Arc<TokenManager>,
    registry: Arc<Registry>,
}

impl MailService {
    pub fn new(
        accounts: Arc<dyn TokenStore>,
        tokens: Arc<TokenManager>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            registry,
        }
    }

    /// Send `message` from the linked account `account_id`.
    #[instrument(skip(self, message), fields(thread_id = ?message.thread_id))]
    pub async fn send(&self, account_id: Uuid, message: OutgoingMessage) -> Result<(), SyncError> {
        let account = self
            .accounts
            .load_account(account_id)
            .await
            .map_err(|e| SyncError::Internal(format!("{:#}", e)))?
            .ok_or(SyncError::AccountNotFound(account_id))?;

        let connector = self
            .registry
            .get(&account.provider)
            .map_err(|_| SyncError::UnsupportedProvider(account.provider.clone()))?;
        let access_token = self.tokens.get_valid_access_token(&account).await?;

        connector.send_message(&access_token, &message).await?;
        info!(provider = %account.provider, "Message sent");
        Ok(())
    }
}
