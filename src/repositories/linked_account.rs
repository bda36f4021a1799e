//! Linked account repository for database operations
//!
//! Rows are keyed by `(provider, provider_account_id)`. Token columns hold
//! ciphertext; callers encrypt before calling in and decrypt after reading.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::linked_account::{self, Entity as LinkedAccount};
use crate::token_manager::TokenStore;

/// Fields written when an OAuth callback completes.
#[derive(Debug, Clone)]
pub struct NewLinkedAccount {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub access_token_ciphertext: Vec<u8>,
    pub refresh_token_ciphertext: Option<Vec<u8>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Repository for linked account database operations
#[derive(Debug, Clone)]
pub struct LinkedAccountRepository {
    pub db: Arc<DatabaseConnection>,
}

impl LinkedAccountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: &Uuid) -> Result<Option<linked_account::Model>> {
        Ok(LinkedAccount::find_by_id(*id).one(&*self.db).await?)
    }

    /// Finds an account by its unique `(provider, provider_account_id)` pair
    pub async fn find_by_provider_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<linked_account::Model>> {
        Ok(LinkedAccount::find()
            .filter(linked_account::Column::Provider.eq(provider))
            .filter(linked_account::Column::ProviderAccountId.eq(provider_account_id))
            .one(&*self.db)
            .await?)
    }

    /// Lists a user's linked accounts, oldest first
    pub async fn find_for_user(&self, user_id: &Uuid) -> Result<Vec<linked_account::Model>> {
        Ok(LinkedAccount::find()
            .filter(linked_account::Column::UserId.eq(*user_id))
            .order_by_asc(linked_account::Column::CreatedAt)
            .order_by_asc(linked_account::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Creates the account or refreshes the existing row for the same
    /// provider identity.
    ///
    /// A missing refresh token keeps the stored one: providers commonly omit
    /// it on re-consent.
    pub async fn upsert(&self, account: NewLinkedAccount) -> Result<linked_account::Model> {
        let now = Utc::now();

        if let Some(existing) = self
            .find_by_provider_account(&account.provider, &account.provider_account_id)
            .await?
        {
            let mut am: linked_account::ActiveModel = existing.into();
            am.user_id = Set(account.user_id);
            am.email = Set(account.email);
            am.access_token_ciphertext = Set(account.access_token_ciphertext);
            if let Some(refresh) = account.refresh_token_ciphertext {
                am.refresh_token_ciphertext = Set(Some(refresh));
            }
            am.expires_at = Set(account.expires_at.map(Into::into));
            am.updated_at = Set(now.into());
            return Ok(am.update(&*self.db).await?);
        }

        let id = Uuid::new_v4();
        let am = linked_account::ActiveModel {
            id: Set(id),
            user_id: Set(account.user_id),
            provider: Set(account.provider.clone()),
            provider_account_id: Set(account.provider_account_id.clone()),
            email: Set(account.email),
            access_token_ciphertext: Set(account.access_token_ciphertext),
            refresh_token_ciphertext: Set(account.refresh_token_ciphertext),
            expires_at: Set(account.expires_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        LinkedAccount::insert(am)
            .exec_without_returning(&*self.db)
            .await?;

        self.find_by_id(&id).await?.ok_or_else(|| {
            anyhow!(
                "linked account {}/{} not persisted",
                account.provider,
                account.provider_account_id
            )
        })
    }

    /// Writes a refreshed token pair and its expiry.
    ///
    /// `refresh_token_ciphertext = None` keeps the stored refresh token.
    pub async fn update_tokens(
        &self,
        id: &Uuid,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<linked_account::Model> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Linked account '{}' not found", id))?;

        let mut am: linked_account::ActiveModel = existing.into();
        am.access_token_ciphertext = Set(access_token_ciphertext);
        if let Some(cipher) = refresh_token_ciphertext {
            am.refresh_token_ciphertext = Set(Some(cipher));
        }
        am.expires_at = Set(expires_at.map(Into::into));
        am.updated_at = Set(Utc::now().into());

        Ok(am.update(&*self.db).await?)
    }
}

#[async_trait]
impl TokenStore for LinkedAccountRepository {
    async fn load_account(&self, account_id: Uuid) -> Result<Option<linked_account::Model>> {
        self.find_by_id(&account_id).await
    }

    async fn save_refreshed_tokens(
        &self,
        account_id: Uuid,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        expires_at: DateTime<Utc>,
    ) -> Result<linked_account::Model> {
        self.update_tokens(
            &account_id,
            access_token_ciphertext,
            refresh_token_ciphertext,
            Some(expires_at),
        )
        .await
    }
}
