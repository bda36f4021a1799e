//! Email repository for database operations

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::email::{self, Entity as Email};

/// Desired state of a synced email. Remote state wins on every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub user_id: Uuid,
    pub thread_id: Uuid,
    pub external_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub body_html: Option<String>,
    pub is_read: bool,
    pub sent_at: DateTime<Utc>,
}

impl EmailRecord {
    fn matches(&self, model: &email::Model) -> bool {
        let sent_at: DateTimeWithTimeZone = self.sent_at.into();
        model.thread_id == self.thread_id
            && model.from_addr == self.from
            && model.to_addrs == self.to
            && model.subject == self.subject
            && model.body == self.body
            && model.body_html == self.body_html
            && model.is_read == self.is_read
            && model.sent_at == sent_at
    }
}

/// Repository for email database operations
#[derive(Debug, Clone)]
pub struct EmailRepository {
    pub db: Arc<DatabaseConnection>,
}

impl EmailRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<email::Model>> {
        Ok(Email::find()
            .filter(email::Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await?)
    }

    /// Inserts the email or overwrites its synced fields; a no-op when the
    /// stored row already matches.
    pub async fn upsert_by_external_id(&self, record: &EmailRecord) -> Result<email::Model> {
        let now = Utc::now();

        if let Some(existing) = self.find_by_external_id(&record.external_id).await? {
            if record.matches(&existing) {
                return Ok(existing);
            }

            let mut am: email::ActiveModel = existing.into();
            am.thread_id = Set(record.thread_id);
            am.from_addr = Set(record.from.clone());
            am.to_addrs = Set(record.to.clone());
            am.subject = Set(record.subject.clone());
            am.body = Set(record.body.clone());
            am.body_html = Set(record.body_html.clone());
            am.is_read = Set(record.is_read);
            am.sent_at = Set(record.sent_at.into());
            am.updated_at = Set(now.into());
            return Ok(am.update(&*self.db).await?);
        }

        let id = Uuid::new_v4();
        let am = email::ActiveModel {
            id: Set(id),
            user_id: Set(record.user_id),
            thread_id: Set(record.thread_id),
            external_id: Set(record.external_id.clone()),
            from_addr: Set(record.from.clone()),
            to_addrs: Set(record.to.clone()),
            subject: Set(record.subject.clone()),
            body: Set(record.body.clone()),
            body_html: Set(record.body_html.clone()),
            is_read: Set(record.is_read),
            sent_at: Set(record.sent_at.into()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Email::insert(am).exec_without_returning(&*self.db).await?;

        Email::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("email '{}' not persisted", record.external_id))
    }

    pub async fn find_by_thread(&self, thread_id: &Uuid) -> Result<Vec<email::Model>> {
        use sea_orm::QueryOrder;

        Ok(Email::find()
            .filter(email::Column::ThreadId.eq(*thread_id))
            .order_by_asc(email::Column::SentAt)
            .all(&*self.db)
            .await?)
    }
}
