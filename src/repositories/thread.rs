//! Thread repository for database operations
//!
//! Sync writes go through [`ThreadRepository::upsert_by_external_id`]; the
//! read side serves folder listings, thread detail, and folder counts.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Folder;
use crate::models::email::{self, Entity as Email};
use crate::models::thread::{self, Entity as Thread};

/// Default page size for folder listings.
pub const DEFAULT_THREAD_LIMIT: u64 = 50;

/// Desired state of a synced thread, taken from its latest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub user_id: Uuid,
    pub external_id: String,
    pub subject: String,
    pub snippet: String,
    pub folder: Folder,
    pub last_message_at: DateTime<Utc>,
}

/// A thread together with its most recent email, for list views.
#[derive(Debug, Clone)]
pub struct ThreadWithLatest {
    pub thread: thread::Model,
    pub latest_email: Option<email::Model>,
}

/// Per-folder thread counts for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FolderCounts {
    pub inbox: u64,
    pub sent: u64,
    pub drafts: u64,
    pub trash: u64,
}

/// Repository for thread database operations
#[derive(Debug, Clone)]
pub struct ThreadRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ThreadRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<thread::Model>> {
        Ok(Thread::find()
            .filter(thread::Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await?)
    }

    /// Inserts the thread or brings an existing row up to date.
    ///
    /// Display fields are only replaced when the incoming record is at least
    /// as recent as what is stored, so replaying an older page never rolls a
    /// thread back. Unchanged rows are not written.
    pub async fn upsert_by_external_id(&self, record: &ThreadRecord) -> Result<thread::Model> {
        let now = Utc::now();

        if let Some(existing) = self.find_by_external_id(&record.external_id).await? {
            let incoming_at: sea_orm::prelude::DateTimeWithTimeZone =
                record.last_message_at.into();
            if incoming_at < existing.last_message_at {
                return Ok(existing);
            }

            let unchanged = existing.subject == record.subject
                && existing.snippet == record.snippet
                && existing.folder == record.folder
                && existing.last_message_at == incoming_at;
            if unchanged {
                return Ok(existing);
            }

            let mut am: thread::ActiveModel = existing.into();
            am.subject = Set(record.subject.clone());
            am.snippet = Set(record.snippet.clone());
            am.folder = Set(record.folder);
            am.last_message_at = Set(incoming_at);
            am.updated_at = Set(now.into());
            return Ok(am.update(&*self.db).await?);
        }

        let id = Uuid::new_v4();
        let am = thread::ActiveModel {
            id: Set(id),
            user_id: Set(record.user_id),
            external_id: Set(Some(record.external_id.clone())),
            subject: Set(record.subject.clone()),
            snippet: Set(record.snippet.clone()),
            folder: Set(record.folder),
            last_message_at: Set(record.last_message_at.into()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Thread::insert(am).exec_without_returning(&*self.db).await?;

        Thread::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("thread '{}' not persisted", record.external_id))
    }

    /// Most recent threads for a user, optionally restricted to one folder,
    /// each paired with its latest email.
    pub async fn list_by_folder(
        &self,
        user_id: &Uuid,
        folder: Option<Folder>,
        limit: u64,
    ) -> Result<Vec<ThreadWithLatest>> {
        let mut query = Thread::find().filter(thread::Column::UserId.eq(*user_id));
        if let Some(folder) = folder {
            query = query.filter(thread::Column::Folder.eq(folder));
        }

        let threads = query
            .order_by_desc(thread::Column::LastMessageAt)
            .order_by_asc(thread::Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await?;

        let mut out = Vec::with_capacity(threads.len());
        for thread in threads {
            let latest_email = Email::find()
                .filter(email::Column::ThreadId.eq(thread.id))
                .order_by_desc(email::Column::SentAt)
                .one(&*self.db)
                .await?;
            out.push(ThreadWithLatest {
                thread,
                latest_email,
            });
        }
        Ok(out)
    }

    /// A user's thread with all of its emails, oldest first.
    pub async fn get_with_emails(
        &self,
        user_id: &Uuid,
        thread_id: &Uuid,
    ) -> Result<Option<(thread::Model, Vec<email::Model>)>> {
        let Some(thread) = Thread::find_by_id(*thread_id)
            .filter(thread::Column::UserId.eq(*user_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        let emails = Email::find()
            .filter(email::Column::ThreadId.eq(thread.id))
            .order_by_asc(email::Column::SentAt)
            .order_by_asc(email::Column::Id)
            .all(&*self.db)
            .await?;

        Ok(Some((thread, emails)))
    }

    /// Marks every email in the thread as read.
    ///
    /// Returns `None` if the thread does not exist for this user, otherwise
    /// the number of emails that changed.
    pub async fn mark_read(&self, user_id: &Uuid, thread_id: &Uuid) -> Result<Option<u64>> {
        let exists = Thread::find_by_id(*thread_id)
            .filter(thread::Column::UserId.eq(*user_id))
            .one(&*self.db)
            .await?
            .is_some();
        if !exists {
            return Ok(None);
        }

        let result = Email::update_many()
            .col_expr(email::Column::IsRead, Expr::value(true))
            .col_expr(
                email::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(email::Column::ThreadId.eq(*thread_id))
            .filter(email::Column::IsRead.eq(false))
            .exec(&*self.db)
            .await?;

        Ok(Some(result.rows_affected))
    }

    pub async fn folder_counts(&self, user_id: &Uuid) -> Result<FolderCounts> {
        let mut counts = FolderCounts::default();
        for folder in Folder::ALL {
            let n = Thread::find()
                .filter(thread::Column::UserId.eq(*user_id))
                .filter(thread::Column::Folder.eq(folder))
                .count(&*self.db)
                .await?;
            match folder {
                Folder::Inbox => counts.inbox = n,
                Folder::Sent => counts.sent = n,
                Folder::Drafts => counts.drafts = n,
                Folder::Trash => counts.trash = n,
            }
        }
        Ok(counts)
    }
}
