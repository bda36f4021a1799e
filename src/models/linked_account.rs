//! LinkedAccount entity model
//!
//! One OAuth-linked mail identity. At most one row exists per
//! `(provider, provider_account_id)`; the token columns are AES-GCM
//! ciphertext (see [`crate::crypto`]) and are only written by the token
//! manager and the OAuth callback.

use super::user::Entity as User;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "linked_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Provider identifier, e.g. `google` or `aurinko`
    pub provider: String,

    /// Provider-side account identifier
    pub provider_account_id: String,

    /// Mailbox address reported by the provider
    pub email: String,

    /// Encrypted access token
    pub access_token_ciphertext: Vec<u8>,

    /// Encrypted refresh token, absent when the provider issued none
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry; `None` means "valid until proven otherwise"
    pub expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// AAD used to encrypt this account's tokens.
    pub fn token_aad(&self) -> String {
        crate::crypto::token_aad(&self.provider, &self.provider_account_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "User",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<User> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
