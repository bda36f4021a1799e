//! Storage seam used by the sync reconciler.
//!
//! The reconciler only needs two keyed upserts. Keeping them behind a trait
//! lets tests wrap the real store with failure injection.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::repositories::{EmailRecord, EmailRepository, ThreadRecord, ThreadRepository};

#[async_trait]
pub trait MailStore: Send + Sync {
    /// Insert or update a thread keyed by its external id; returns the local id
    async fn upsert_thread(&self, record: ThreadRecord) -> Result<Uuid>;

    /// Insert or update an email keyed by its external id; returns the local id
    async fn upsert_email(&self, record: EmailRecord) -> Result<Uuid>;
}

/// [`MailStore`] over the SeaORM repositories.
#[derive(Debug, Clone)]
pub struct SeaOrmMailStore {
    threads: ThreadRepository,
    emails: EmailRepository,
}

impl SeaOrmMailStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            threads: ThreadRepository::new(db.clone()),
            emails: EmailRepository::new(db),
        }
    }
}

#[async_trait]
impl MailStore for SeaOrmMailStore {
    async fn upsert_thread(&self, record: ThreadRecord) -> Result<Uuid> {
        Ok(self.threads.upsert_by_external_id(&record).await?.id)
    }

    async fn upsert_email(&self, record: EmailRecord) -> Result<Uuid> {
        Ok(self.emails.upsert_by_external_id(&record).await?.id)
    }
}
