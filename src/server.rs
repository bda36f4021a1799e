//! # Server Configuration
//!
//! Shared application state, the axum router and the OpenAPI document.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::ai::AiClient;
use crate::config::AppConfig;
use crate::connectors::Registry;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::handlers::auth::PendingAuthorizations;
use crate::mail::MailService;
use crate::repositories::LinkedAccountRepository;
use crate::storage::SeaOrmMailStore;
use crate::sync::{Reconciler, SyncService, SyncSettings};
use crate::telemetry;
use crate::token_manager::TokenManager;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
    pub registry: Arc<Registry>,
    pub tokens: Arc<TokenManager>,
    pub sync: Arc<SyncService>,
    pub mail: Arc<MailService>,
    pub ai: Arc<AiClient>,
    pub pending_auth: PendingAuthorizations,
}

impl AppState {
    /// Wire the services over `db` and the provider `registry`.
    pub fn new(config: AppConfig, db: DatabaseConnection, registry: Registry) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .ok_or_else(|| anyhow!("crypto key is not configured"))?;
        let crypto_key = CryptoKey::new(key_bytes).context("invalid crypto key")?;
        let timeout = Duration::from_secs(config.sync.http_timeout_secs);

        let db = Arc::new(db);
        let registry = Arc::new(registry);
        let accounts = Arc::new(LinkedAccountRepository::new(db.clone()));

        let tokens = Arc::new(TokenManager::new(
            accounts.clone(),
            registry.clone(),
            crypto_key.clone(),
            timeout,
        ));
        let reconciler = Reconciler::new(
            Arc::new(SeaOrmMailStore::new(db.clone())),
            SyncSettings::from(&config.sync),
        );
        let sync = Arc::new(SyncService::new(
            accounts.clone(),
            tokens.clone(),
            registry.clone(),
            reconciler,
        ));
        let mail = Arc::new(MailService::new(accounts, tokens.clone(), registry.clone()));
        let ai = Arc::new(AiClient::new(&config.ai, timeout)?);

        Ok(Self {
            config: Arc::new(config),
            db,
            crypto_key,
            registry,
            tokens,
            sync,
            mail,
            ai,
            pending_auth: PendingAuthorizations::default(),
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/auth/{provider}", get(handlers::auth::start_authorization))
        .route(
            "/auth/{provider}/callback",
            get(handlers::auth::authorization_callback),
        )
        .route("/mail/sync", post(handlers::mail::sync_account))
        .route("/mail/threads", get(handlers::mail::list_threads))
        .route("/mail/threads/{id}", get(handlers::mail::get_thread))
        .route("/mail/threads/{id}/read", post(handlers::mail::mark_thread_read))
        .route("/mail/folders/counts", get(handlers::mail::folder_counts))
        .route("/mail/send", post(handlers::mail::send_message))
        .route("/ai/summarize", post(handlers::ai::summarize))
        .route("/ai/reply-suggestions", post(handlers::ai::reply_suggestions))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    let addr = config.bind_addr().context("invalid server address")?;
    let registry = Registry::from_config(&config)?;
    info!(providers = ?registry.providers(), "Connectors registered");

    let profile = config.profile.clone();
    let app = create_app(AppState::new(config, db, registry)?);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::auth::start_authorization,
        crate::handlers::auth::authorization_callback,
        crate::handlers::mail::sync_account,
        crate::handlers::mail::list_threads,
        crate::handlers::mail::get_thread,
        crate::handlers::mail::mark_thread_read,
        crate::handlers::mail::folder_counts,
        crate::handlers::mail::send_message,
        crate::handlers::ai::summarize,
        crate::handlers::ai::reply_suggestions,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Folder,
            crate::error::ApiError,
            crate::sync::SyncOutcome,
            crate::handlers::HealthResponse,
            crate::handlers::auth::AuthorizeUrlResponse,
            crate::handlers::auth::LinkedAccountResponse,
            crate::handlers::mail::SyncRequest,
            crate::handlers::mail::SyncResponse,
            crate::handlers::mail::ThreadSummary,
            crate::handlers::mail::ThreadsResponse,
            crate::handlers::mail::ThreadDetail,
            crate::handlers::mail::EmailView,
            crate::handlers::mail::FolderCountsResponse,
            crate::handlers::mail::SendRequest,
            crate::handlers::mail::SendResponse,
            crate::handlers::mail::MarkReadResponse,
            crate::handlers::ai::SummarizeRequest,
            crate::handlers::ai::SummarizeResponse,
            crate::handlers::ai::ReplySuggestionsRequest,
            crate::handlers::ai::ReplySuggestionsResponse,
            crate::ai::ReplySuggestion,
            crate::ai::Tone,
        )
    ),
    info(
        title = "Mailsync API",
        description = "Webmail sync, token lifecycle and mail helpers",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
