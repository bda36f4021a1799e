//! Sync reconciler
//!
//! One run: list a bounded page of remote messages, fetch their full content,
//! normalize, group by thread, then upsert threads followed by emails through
//! a fixed-width write pool. Per-record failures are counted and skipped;
//! only listing failures abort the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::bounded::run_bounded;
use super::{SyncError, SyncOutcome};
use crate::config::SyncConfig;
use crate::connectors::{ConnectorError, ListParams, MailConnector, RawMessage};
use crate::models::linked_account;
use crate::normalization::{self, NormalizedMessage};
use crate::repositories::{EmailRecord, ThreadRecord};
use crate::storage::MailStore;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub gmail_page_size: u32,
    pub aurinko_page_size: u32,
    /// Maximum concurrent storage writes
    pub write_concurrency: usize,
    /// Applied to each provider call
    pub request_timeout: Duration,
    pub snippet_max_chars: usize,
}

impl SyncSettings {
    pub fn page_size(&self, provider: &str) -> u32 {
        match provider {
            crate::connectors::aurinko::PROVIDER_ID => self.aurinko_page_size,
            _ => self.gmail_page_size,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            gmail_page_size: config.gmail_page_size,
            aurinko_page_size: config.aurinko_page_size,
            write_concurrency: config.write_concurrency,
            request_timeout: Duration::from_secs(config.http_timeout_secs),
            snippet_max_chars: config.snippet_max_chars,
        }
    }
}

/// Messages of one thread, newest first.
#[derive(Debug)]
struct ThreadGroup {
    external_id: String,
    messages: Vec<NormalizedMessage>,
}

impl ThreadGroup {
    fn latest(&self) -> &NormalizedMessage {
        &self.messages[0]
    }
}

/// Group by thread id, keeping threads in first-seen order. Within a group
/// messages are ordered by `sent_at` descending; the sort is stable so equal
/// timestamps keep listing order.
fn group_by_thread(messages: Vec<NormalizedMessage>) -> Vec<ThreadGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<ThreadGroup> = Vec::new();

    for message in messages {
        match index.get(&message.thread_external_id) {
            Some(&i) => groups[i].messages.push(message),
            None => {
                index.insert(message.thread_external_id.clone(), groups.len());
                groups.push(ThreadGroup {
                    external_id: message.thread_external_id.clone(),
                    messages: vec![message],
                });
            }
        }
    }

    for group in &mut groups {
        group.messages.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    }
    groups
}

pub struct Reconciler {
    store: Arc<dyn MailStore>,
    settings: SyncSettings,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MailStore>, settings: SyncSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    #[instrument(
        skip(self, account, connector, access_token),
        fields(account_id = %account.id, provider = %account.provider)
    )]
    pub async fn sync(
        &self,
        account: &linked_account::Model,
        connector: &dyn MailConnector,
        access_token: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let mut outcome = SyncOutcome::default();

        let params = ListParams {
            max_results: self.settings.page_size(connector.provider()),
            page_token: None,
        };
        let listing = tokio::time::timeout(
            self.settings.request_timeout,
            connector.list_messages(access_token, params),
        )
        .await
        .map_err(|_| SyncError::ProviderUnavailable("message listing timed out".to_string()))?
        .map_err(SyncError::from)?;

        if listing.messages.is_empty() {
            info!("No remote messages listed");
            return Ok(outcome);
        }
        debug!(listed = listing.messages.len(), "Listed remote messages");

        let fetched = self
            .fetch_all(connector, access_token, &listing.messages)
            .await?;

        let mut normalized = Vec::with_capacity(listing.messages.len());
        for (summary, full) in listing.messages.iter().zip(fetched) {
            let record = match full {
                Ok(raw) => normalization::normalize_with(&raw, self.settings.snippet_max_chars),
                Err(err) => {
                    warn!(message_id = %summary.id(), error = %err, "Fetch failed; using listing entry");
                    outcome.fetch_fallbacks += 1;
                    NormalizedMessage::from_summary(summary, self.settings.snippet_max_chars)
                }
            };
            match record {
                Ok(record) => normalized.push(record),
                Err(err) => {
                    warn!(message_id = %summary.id(), error = %err, "Skipping message that failed normalization");
                    outcome.skipped_normalization += 1;
                }
            }
        }

        let groups = group_by_thread(normalized);
        let thread_ids = self.upsert_threads(account.user_id, &groups).await;
        outcome.threads_upserted = thread_ids.len();

        let mut email_records = Vec::new();
        for group in &groups {
            let Some(&thread_id) = thread_ids.get(&group.external_id) else {
                outcome.skipped_storage += group.messages.len();
                continue;
            };
            for message in &group.messages {
                email_records.push(email_record(account.user_id, thread_id, message));
            }
        }

        let store = self.store.clone();
        let results = run_bounded(
            self.settings.write_concurrency,
            email_records,
            move |record| {
                let store = store.clone();
                async move {
                    let external_id = record.external_id.clone();
                    store.upsert_email(record).await.map_err(|e| {
                        e.context(format!("email upsert failed for {}", external_id))
                    })
                }
            },
        )
        .await;

        for result in results {
            match result {
                Ok(_) => outcome.synced_count += 1,
                Err(err) => {
                    warn!(error = %format!("{:#}", err), "Skipping email after write failure");
                    outcome.skipped_storage += 1;
                }
            }
        }

        counter!("mailsync_synced_emails_total").increment(outcome.synced_count as u64);
        if outcome.skipped_normalization > 0 {
            counter!("mailsync_skipped_records_total", "reason" => "normalization")
                .increment(outcome.skipped_normalization as u64);
        }
        if outcome.skipped_storage > 0 {
            counter!("mailsync_skipped_records_total", "reason" => "storage")
                .increment(outcome.skipped_storage as u64);
        }

        info!(
            synced = outcome.synced_count,
            threads = outcome.threads_upserted,
            skipped_normalization = outcome.skipped_normalization,
            skipped_storage = outcome.skipped_storage,
            fetch_fallbacks = outcome.fetch_fallbacks,
            "Sync run complete"
        );
        Ok(outcome)
    }

    /// Full content for each listing entry, index-aligned with `listed`.
    ///
    /// A batch-level auth or API-disabled failure aborts the run; any other
    /// batch-level failure degrades every entry to its listing summary.
    async fn fetch_all(
        &self,
        connector: &dyn MailConnector,
        access_token: &str,
        listed: &[RawMessage],
    ) -> Result<Vec<Result<RawMessage, ConnectorError>>, SyncError> {
        let fetched = connector
            .fetch_messages(access_token, listed, self.settings.request_timeout)
            .await;

        match fetched {
            Ok(mut results) => {
                results.resize_with(listed.len(), || {
                    Err(ConnectorError::MalformedResponse(
                        "no fetch result for listed message".to_string(),
                    ))
                });
                Ok(results)
            }
            Err(err @ (ConnectorError::Unauthorized(_) | ConnectorError::ApiDisabled(_))) => {
                Err(SyncError::from(err))
            }
            Err(err) => {
                warn!(error = %err, "Full-content fetch failed; falling back to listing entries");
                Ok(listed.iter().map(|_| Err(err.clone())).collect())
            }
        }
    }

    /// Upsert one thread per group; returns external id to local id for the
    /// threads that were written.
    async fn upsert_threads(&self, user_id: Uuid, groups: &[ThreadGroup]) -> HashMap<String, Uuid> {
        let records: Vec<ThreadRecord> = groups
            .iter()
            .map(|group| {
                let latest = group.latest();
                ThreadRecord {
                    user_id,
                    external_id: group.external_id.clone(),
                    subject: latest.subject.clone(),
                    snippet: latest.snippet.clone(),
                    folder: latest.folder,
                    last_message_at: latest.sent_at,
                }
            })
            .collect();

        let store = self.store.clone();
        let results = run_bounded(self.settings.write_concurrency, records, move |record| {
            let store = store.clone();
            async move { store.upsert_thread(record).await }
        })
        .await;

        let mut ids = HashMap::new();
        for (group, result) in groups.iter().zip(results) {
            match result {
                Ok(id) => {
                    ids.insert(group.external_id.clone(), id);
                }
                Err(err) => {
                    warn!(
                        thread_external_id = %group.external_id,
                        dependent_emails = group.messages.len(),
                        error = %err,
                        "Thread upsert failed; skipping its emails"
                    );
                }
            }
        }
        ids
    }
}

fn email_record(user_id: Uuid, thread_id: Uuid, message: &NormalizedMessage) -> EmailRecord {
    EmailRecord {
        user_id,
        thread_id,
        external_id: message.external_id.clone(),
        from: message.from.clone(),
        to: message.to.clone(),
        subject: message.subject.clone(),
        body: message.body.clone(),
        body_html: message.body_html.clone(),
        is_read: message.is_read,
        sent_at: message.sent_at,
    }
}
