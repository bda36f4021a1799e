//! # Data Models
//!
//! SeaORM entities for users, linked accounts, threads, and emails.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod email;
pub mod folder;
pub mod linked_account;
pub mod thread;
pub mod user;

pub use email::Entity as Email;
pub use folder::Folder;
pub use linked_account::Entity as LinkedAccount;
pub use thread::Entity as Thread;
pub use user::Entity as User;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "mailsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
