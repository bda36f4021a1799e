//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite with migrations applied, fixture builders for users and
//! linked accounts, a scriptable [`FakeConnector`] and a [`FailingMailStore`]
//! that injects write failures.

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use mailsync::connectors::{
    AccountProfile, AurinkoAddress, AurinkoMessage, ConnectorError, GmailBody, GmailHeader,
    GmailMessage, GmailPayload, ListParams, MailConnector, MessageListing, OutgoingMessage,
    RawMessage, TokenGrant, fetch_each,
};
use mailsync::crypto::{self, CryptoKey};
use mailsync::migration::{Migrator, MigratorTrait};
use mailsync::models::{linked_account, user};
use mailsync::repositories::{
    EmailRecord, LinkedAccountRepository, NewLinkedAccount, ThreadRecord, UserRepository,
};
use mailsync::storage::{MailStore, SeaOrmMailStore};
use sea_orm::{Database, DatabaseConnection};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32-byte key")
}

pub async fn create_user(db: &Arc<DatabaseConnection>, email: &str) -> Result<user::Model> {
    UserRepository::new(db.clone())
        .upsert_by_email(email, None)
        .await
}

/// Inserts a linked account whose tokens are encrypted with [`test_crypto_key`].
pub async fn create_linked_account(
    db: &Arc<DatabaseConnection>,
    user_id: Uuid,
    provider: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<linked_account::Model> {
    let key = test_crypto_key();
    let provider_account_id = format!("acct-{}", Uuid::new_v4());
    let aad = crypto::token_aad(provider, &provider_account_id);

    let access_token_ciphertext = crypto::encrypt_token(&key, &aad, access_token)?;
    let refresh_token_ciphertext = refresh_token
        .map(|rt| crypto::encrypt_token(&key, &aad, rt))
        .transpose()?;

    LinkedAccountRepository::new(db.clone())
        .upsert(NewLinkedAccount {
            user_id,
            provider: provider.to_string(),
            email: format!("{}@example.com", provider_account_id),
            provider_account_id,
            access_token_ciphertext,
            refresh_token_ciphertext,
            expires_at,
        })
        .await
}

/// Decrypts a stored token column with the test key.
pub fn decrypt(account: &linked_account::Model, ciphertext: &[u8]) -> String {
    crypto::decrypt_token(&test_crypto_key(), &account.token_aad(), ciphertext)
        .expect("token decrypts")
}

/// A fully fetched Gmail message with a plain-text body.
pub fn gmail_message(
    id: &str,
    thread_id: &str,
    sent_at: DateTime<Utc>,
    subject: &str,
    labels: &[&str],
) -> RawMessage {
    let header = |name: &str, value: &str| GmailHeader {
        name: name.to_string(),
        value: value.to_string(),
    };
    RawMessage::Gmail(GmailMessage {
        id: id.to_string(),
        thread_id: Some(thread_id.to_string()),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        snippet: Some(format!("Preview of {}", subject)),
        internal_date: Some(sent_at.timestamp_millis().to_string()),
        payload: Some(GmailPayload {
            mime_type: Some("text/plain".to_string()),
            headers: vec![
                header("From", "Alice <alice@example.com>"),
                header("To", "bob@example.com"),
                header("Subject", subject),
            ],
            body: Some(GmailBody {
                data: Some(URL_SAFE_NO_PAD.encode(format!("Body of {}", subject))),
                size: None,
            }),
            parts: Vec::new(),
        }),
    })
}

/// A fully fetched Aurinko message; its listing entry drops the bodies.
pub fn aurinko_message(
    id: &str,
    thread_id: &str,
    sent_at: DateTime<Utc>,
    subject: &str,
) -> RawMessage {
    RawMessage::Aurinko(AurinkoMessage {
        id: id.to_string(),
        thread_id: Some(thread_id.to_string()),
        subject: Some(subject.to_string()),
        from: Some(AurinkoAddress {
            email: "carol@example.com".to_string(),
            name: Some("Carol".to_string()),
        }),
        to: vec![AurinkoAddress {
            email: "dave@example.com".to_string(),
            name: None,
        }],
        date: Some(sent_at.to_rfc3339()),
        body_snippet: Some(format!("Snippet of {}", subject)),
        body: Some(format!("Full body of {}", subject)),
        body_html: Some(format!("<p>Full body of {}</p>", subject)),
        is_read: Some(false),
        labels: vec!["INBOX".to_string()],
    })
}

/// Reduce a message to what a listing page carries.
fn listing_entry(message: &RawMessage) -> RawMessage {
    match message {
        RawMessage::Gmail(m) => RawMessage::Gmail(GmailMessage {
            id: m.id.clone(),
            thread_id: m.thread_id.clone(),
            ..Default::default()
        }),
        RawMessage::Aurinko(m) => RawMessage::Aurinko(AurinkoMessage {
            body: None,
            body_html: None,
            ..m.clone()
        }),
    }
}

/// Scriptable in-process connector.
pub struct FakeConnector {
    provider: &'static str,
    pub refresh_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    refresh_delay: Duration,
    refresh_result: Mutex<Result<TokenGrant, ConnectorError>>,
    listing: Mutex<Result<Vec<RawMessage>, ConnectorError>>,
    full_messages: Mutex<HashMap<String, RawMessage>>,
    fetch_failures: Mutex<HashSet<String>>,
    fetch_delays: Mutex<HashMap<String, Duration>>,
    batch_fetch_error: Mutex<Option<ConnectorError>>,
    profile: AccountProfile,
    pub list_params: Mutex<Vec<ListParams>>,
    pub seen_tokens: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
}

impl FakeConnector {
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            refresh_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            refresh_delay: Duration::ZERO,
            refresh_result: Mutex::new(Ok(TokenGrant {
                access_token: "refreshed-access".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
            })),
            listing: Mutex::new(Ok(Vec::new())),
            full_messages: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashSet::new()),
            fetch_delays: Mutex::new(HashMap::new()),
            batch_fetch_error: Mutex::new(None),
            profile: AccountProfile {
                provider_account_id: "fake-account-1".to_string(),
                email: "owner@example.com".to_string(),
                name: Some("Owner".to_string()),
            },
            list_params: Mutex::new(Vec::new()),
            seen_tokens: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn set_refresh_result(&self, result: Result<TokenGrant, ConnectorError>) {
        *self.refresh_result.lock().unwrap() = result;
    }

    /// Lists `messages` and serves their full content on fetch.
    pub fn set_messages(&self, messages: Vec<RawMessage>) {
        let mut full = self.full_messages.lock().unwrap();
        full.clear();
        for message in &messages {
            full.insert(message.id().to_string(), message.clone());
        }
        *self.listing.lock().unwrap() = Ok(messages.iter().map(listing_entry).collect());
    }

    pub fn set_listing_error(&self, err: ConnectorError) {
        *self.listing.lock().unwrap() = Err(err);
    }

    pub fn fail_fetch_for(&self, message_id: &str) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(message_id.to_string());
    }

    /// Delays the full-content fetch of one message.
    pub fn delay_fetch_for(&self, message_id: &str, delay: Duration) {
        self.fetch_delays
            .lock()
            .unwrap()
            .insert(message_id.to_string(), delay);
    }

    pub fn set_batch_fetch_error(&self, err: ConnectorError) {
        *self.batch_fetch_error.lock().unwrap() = Some(err);
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailConnector for FakeConnector {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, ConnectorError> {
        Url::parse_with_params(
            "https://accounts.fake.test/authorize",
            &[("redirect_uri", redirect_uri), ("state", state)],
        )
        .map_err(|e| ConnectorError::Configuration(e.to_string()))
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenGrant, ConnectorError> {
        if code == "bad-code" {
            return Err(ConnectorError::InvalidGrant("code expired".to_string()));
        }
        Ok(TokenGrant {
            access_token: format!("access-for-{}", code),
            refresh_token: Some("initial-refresh".to_string()),
            expires_in: Some(3599),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, ConnectorError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        self.refresh_result.lock().unwrap().clone()
    }

    async fn account_profile(&self, _access_token: &str) -> Result<AccountProfile, ConnectorError> {
        Ok(self.profile.clone())
    }

    async fn list_messages(
        &self,
        access_token: &str,
        params: ListParams,
    ) -> Result<MessageListing, ConnectorError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());
        self.list_params.lock().unwrap().push(params);
        let messages = self.listing.lock().unwrap().clone()?;
        Ok(MessageListing {
            messages,
            next_page_token: None,
        })
    }

    async fn fetch_message(
        &self,
        _access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, ConnectorError> {
        let delay = self.fetch_delays.lock().unwrap().get(message_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fetch_failures.lock().unwrap().contains(message_id) {
            return Err(ConnectorError::Http {
                status: 500,
                body: "backend error".to_string(),
            });
        }
        self.full_messages
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| ConnectorError::Http {
                status: 404,
                body: format!("message {} not found", message_id),
            })
    }

    async fn fetch_messages(
        &self,
        access_token: &str,
        listed: &[RawMessage],
        call_timeout: Duration,
    ) -> Result<Vec<Result<RawMessage, ConnectorError>>, ConnectorError> {
        let batch_error = self.batch_fetch_error.lock().unwrap().clone();
        if let Some(err) = batch_error {
            return Err(err);
        }
        Ok(fetch_each(self, access_token, listed, call_timeout).await)
    }

    async fn send_message(
        &self,
        _access_token: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectorError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// [`MailStore`] over SQLite that fails writes for chosen external ids and
/// records how many writes were in flight at once.
pub struct FailingMailStore {
    inner: SeaOrmMailStore,
    failing_threads: HashSet<String>,
    failing_emails: HashSet<String>,
    write_delay: Duration,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FailingMailStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            inner: SeaOrmMailStore::new(db),
            failing_threads: HashSet::new(),
            failing_emails: HashSet::new(),
            write_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn fail_thread(mut self, external_id: &str) -> Self {
        self.failing_threads.insert(external_id.to_string());
        self
    }

    pub fn fail_email(mut self, external_id: &str) -> Self {
        self.failing_emails.insert(external_id.to_string());
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailStore for FailingMailStore {
    async fn upsert_thread(&self, record: ThreadRecord) -> Result<Uuid> {
        self.enter().await;
        let result = if self.failing_threads.contains(&record.external_id) {
            Err(anyhow!("injected thread failure for {}", record.external_id))
        } else {
            self.inner.upsert_thread(record).await
        };
        self.leave();
        result
    }

    async fn upsert_email(&self, record: EmailRecord) -> Result<Uuid> {
        self.enter().await;
        let result = if self.failing_emails.contains(&record.external_id) {
            Err(anyhow!("injected email failure for {}", record.external_id))
        } else {
            self.inner.upsert_email(record).await
        };
        self.leave();
        result
    }
}
