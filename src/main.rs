//! # Mailsync Main Entry Point

use mailsync::migration::{Migrator, MigratorTrait};
use mailsync::{config::ConfigLoader, db, server::run_server, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    Migrator::up(&db, None).await?;
    info!("Database migrations applied");

    run_server(config, db).await
}
