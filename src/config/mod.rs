//! Configuration loading for the mail sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `MAILSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "MAILSYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `MAILSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub aurinko: AurinkoConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Google OAuth and Gmail API endpoints.
///
/// Every URL is overridable so tests can point the connector at a mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GoogleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_google_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_userinfo_url")]
    pub userinfo_url: String,
    #[serde(default = "default_gmail_api_base")]
    pub api_base: String,
    #[serde(default = "default_gmail_batch_url")]
    pub batch_url: String,
}

/// Aurinko unified mail API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AurinkoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_aurinko_api_base")]
    pub api_base: String,
}

/// Chat-completions endpoint used for summaries and reply suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AiConfig {
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
}

/// Sync reconciler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Messages requested per Gmail listing (default: 20)
    ///
    /// Environment variable: `MAILSYNC_SYNC_GMAIL_PAGE_SIZE`
    #[serde(default = "default_gmail_page_size")]
    pub gmail_page_size: u32,

    /// Messages requested per Aurinko listing (default: 50)
    ///
    /// Environment variable: `MAILSYNC_SYNC_AURINKO_PAGE_SIZE`
    #[serde(default = "default_aurinko_page_size")]
    pub aurinko_page_size: u32,

    /// Maximum number of storage upserts in flight at once (default: 5)
    ///
    /// Environment variable: `MAILSYNC_SYNC_WRITE_CONCURRENCY`
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,

    /// Timeout applied to every provider call (default: 30)
    ///
    /// Environment variable: `MAILSYNC_SYNC_HTTP_TIMEOUT_SECS`
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Snippet length cap in characters (default: 100)
    ///
    /// Environment variable: `MAILSYNC_SYNC_SNIPPET_MAX_CHARS`
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            public_url: default_public_url(),
            crypto_key: None,
            google: GoogleConfig::default(),
            aurinko: AurinkoConfig::default(),
            ai: AiConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            auth_url: default_google_auth_url(),
            token_url: default_google_token_url(),
            userinfo_url: default_google_userinfo_url(),
            api_base: default_gmail_api_base(),
            batch_url: default_gmail_batch_url(),
        }
    }
}

impl Default for AurinkoConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: default_aurinko_api_base(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ai_endpoint(),
            token: None,
            model: default_ai_model(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gmail_page_size: default_gmail_page_size(),
            aurinko_page_size: default_aurinko_page_size(),
            write_concurrency: default_write_concurrency(),
            http_timeout_secs: default_http_timeout_secs(),
            snippet_max_chars: default_snippet_max_chars(),
        }
    }
}

impl SyncConfig {
    /// Validate sync configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("gmail_page_size", self.gmail_page_size),
            ("aurinko_page_size", self.aurinko_page_size),
        ] {
            if value == 0 || value > 500 {
                return Err(ConfigError::InvalidPageSize { field, value });
            }
        }

        if self.write_concurrency == 0 || self.write_concurrency > 64 {
            return Err(ConfigError::InvalidWriteConcurrency {
                value: self.write_concurrency,
            });
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_secs,
            });
        }

        if self.snippet_max_chars < 10 {
            return Err(ConfigError::InvalidSnippetLength {
                value: self.snippet_max_chars,
            });
        }

        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Profiles where provider credentials may be absent.
    pub fn is_dev_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// OAuth redirect URI registered for the given provider.
    pub fn redirect_uri(&self, provider: &str) -> String {
        format!(
            "{}/auth/{}/callback",
            self.public_url.trim_end_matches('/'),
            provider
        )
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        redact(&mut config.google.client_secret);
        redact(&mut config.aurinko.client_secret);
        redact(&mut config.ai.token);
        if let Some(redacted_url) = redact_url_password(&config.database_url) {
            config.database_url = redacted_url;
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if !self.is_dev_profile() {
            if self.google.client_id.is_none() {
                return Err(ConfigError::MissingProviderCredential {
                    name: "GOOGLE_CLIENT_ID",
                });
            }
            if self.google.client_secret.is_none() {
                return Err(ConfigError::MissingProviderCredential {
                    name: "GOOGLE_CLIENT_SECRET",
                });
            }
        }

        self.sync.validate()?;

        Ok(())
    }
}

fn redact(value: &mut Option<String>) {
    if value.is_some() {
        *value = Some(REDACTED.to_string());
    }
}

fn redact_url_password(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw).ok()?;
    parsed.password()?;
    parsed.set_password(Some(REDACTED)).ok()?;
    Some(parsed.to_string())
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_database_url() -> String {
    "sqlite://mailsync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".to_string()
}

fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

fn default_gmail_batch_url() -> String {
    "https://www.googleapis.com/batch/gmail/v1".to_string()
}

fn default_aurinko_api_base() -> String {
    "https://api.aurinko.io/v1".to_string()
}

fn default_ai_endpoint() -> String {
    "https://models.inference.ai.azure.com/chat/completions".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_gmail_page_size() -> u32 {
    20
}

fn default_aurinko_page_size() -> u32 {
    50
}

fn default_write_concurrency() -> usize {
    5
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_snippet_max_chars() -> usize {
    100
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is missing; set MAILSYNC_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("database url is empty; set MAILSYNC_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("{name} is required outside local/test profiles; set MAILSYNC_{name}")]
    MissingProviderCredential { name: &'static str },
    #[error("{field} must be between 1 and 500, got {value}")]
    InvalidPageSize { field: &'static str, value: u32 },
    #[error("sync write concurrency must be between 1 and 64, got {value}")]
    InvalidWriteConcurrency { value: usize },
    #[error("http timeout must be positive, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("snippet length must be at least 10 characters, got {value}")]
    InvalidSnippetLength { value: usize },
}

/// Loads configuration using layered `.env` files and `MAILSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the layered configuration.
    ///
    /// Precedence, lowest first: `.env`, `.env.local`, `.env.<profile>`,
    /// `.env.<profile>.local`, process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);

        let crypto_key = match take_string(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let google = GoogleConfig {
            client_id: take_string(&mut layered, "GOOGLE_CLIENT_ID"),
            client_secret: take_string(&mut layered, "GOOGLE_CLIENT_SECRET"),
            auth_url: take_string(&mut layered, "GOOGLE_AUTH_URL")
                .unwrap_or_else(default_google_auth_url),
            token_url: take_string(&mut layered, "GOOGLE_TOKEN_URL")
                .unwrap_or_else(default_google_token_url),
            userinfo_url: take_string(&mut layered, "GOOGLE_USERINFO_URL")
                .unwrap_or_else(default_google_userinfo_url),
            api_base: take_string(&mut layered, "GMAIL_API_BASE")
                .unwrap_or_else(default_gmail_api_base),
            batch_url: take_string(&mut layered, "GMAIL_BATCH_URL")
                .unwrap_or_else(default_gmail_batch_url),
        };

        let aurinko = AurinkoConfig {
            client_id: take_string(&mut layered, "AURINKO_CLIENT_ID"),
            client_secret: take_string(&mut layered, "AURINKO_CLIENT_SECRET"),
            api_base: take_string(&mut layered, "AURINKO_API_BASE")
                .unwrap_or_else(default_aurinko_api_base),
        };

        let ai = AiConfig {
            endpoint: take_string(&mut layered, "AI_ENDPOINT").unwrap_or_else(default_ai_endpoint),
            token: take_string(&mut layered, "AI_TOKEN"),
            model: take_string(&mut layered, "AI_MODEL").unwrap_or_else(default_ai_model),
        };

        let sync = SyncConfig {
            gmail_page_size: take_parsed(&mut layered, "SYNC_GMAIL_PAGE_SIZE")
                .unwrap_or_else(default_gmail_page_size),
            aurinko_page_size: take_parsed(&mut layered, "SYNC_AURINKO_PAGE_SIZE")
                .unwrap_or_else(default_aurinko_page_size),
            write_concurrency: take_parsed(&mut layered, "SYNC_WRITE_CONCURRENCY")
                .unwrap_or_else(default_write_concurrency),
            http_timeout_secs: take_parsed(&mut layered, "SYNC_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(default_http_timeout_secs),
            snippet_max_chars: take_parsed(&mut layered, "SYNC_SNIPPET_MAX_CHARS")
                .unwrap_or_else(default_snippet_max_chars),
        };

        let config = AppConfig {
            profile,
            api_bind_addr: take_string(&mut layered, "API_BIND_ADDR")
                .unwrap_or_else(default_api_bind_addr),
            log_level: take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take_string(&mut layered, "LOG_FORMAT")
                .unwrap_or_else(default_log_format),
            database_url: take_string(&mut layered, "DATABASE_URL")
                .unwrap_or_else(default_database_url),
            db_max_connections: take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
                .unwrap_or_else(default_db_acquire_timeout_ms),
            public_url: take_string(&mut layered, "PUBLIC_URL").unwrap_or_else(default_public_url),
            crypto_key,
            google,
            aurinko,
            ai,
            sync,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    take_string(values, key).and_then(|v| v.parse().ok())
}
