//! User repository for database operations

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::user::{self, Entity as User};

/// Repository for user database operations
#[derive(Debug, Clone)]
pub struct UserRepository {
    pub db: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: &Uuid) -> Result<Option<user::Model>> {
        Ok(User::find_by_id(*id).one(&*self.db).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>> {
        Ok(User::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await?)
    }

    /// Returns the user with this email, creating it on first sight.
    ///
    /// A provided `name` replaces the stored one; `None` leaves it untouched.
    pub async fn upsert_by_email(&self, email: &str, name: Option<&str>) -> Result<user::Model> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(anyhow!("user email must not be empty"));
        }

        if let Some(existing) = self.find_by_email(&email).await? {
            match name {
                Some(name) if existing.name.as_deref() != Some(name) => {
                    let mut am: user::ActiveModel = existing.into();
                    am.name = Set(Some(name.to_string()));
                    am.updated_at = Set(Utc::now().into());
                    return Ok(am.update(&*self.db).await?);
                }
                _ => return Ok(existing),
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let am = user::ActiveModel {
            id: Set(id),
            email: Set(email.clone()),
            name: Set(name.map(str::to_string)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        User::insert(am).exec_without_returning(&*self.db).await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("user '{}' not persisted", email))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
