//! Provider registry
//!
//! Maps provider ids to connector instances. The registry is built once at
//! startup and handed to the services that need it; there is no global
//! instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::AppConfig;
use crate::connectors::{
    AurinkoConnector, ConnectorError, GmailConnector, MailConnector, register_aurinko_connector,
    register_gmail_connector,
};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{name}' not found")]
    ProviderNotFound { name: String },
}

#[derive(Clone, Default)]
pub struct Registry {
    connectors: HashMap<String, Arc<dyn MailConnector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with every provider the configuration supports.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConnectorError> {
        let timeout = Duration::from_secs(config.sync.http_timeout_secs);
        let mut registry = Self::new();

        if config.google.client_id.is_none() {
            warn!("Google client credentials missing; OAuth for provider 'google' will fail");
        }
        register_gmail_connector(&mut registry, GmailConnector::new(&config.google, timeout)?);

        if config.aurinko.client_id.is_some() {
            register_aurinko_connector(
                &mut registry,
                AurinkoConnector::new(&config.aurinko, timeout)?,
            );
        } else {
            warn!("Aurinko connector not registered: missing Aurinko client credentials");
        }

        Ok(registry)
    }

    /// Register a connector under its own provider id, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn MailConnector>) {
        self.connectors
            .insert(connector.provider().to_string(), connector);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn MailConnector>, RegistryError> {
        self.connectors
            .get(provider)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound {
                name: provider.to_string(),
            })
    }

    /// Registered provider ids, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("providers", &self.providers())
            .finish()
    }
}
