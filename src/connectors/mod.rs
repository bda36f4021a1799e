//! Connectors module
//!
//! Provider adapters behind the [`MailConnector`] capability interface:
//! - the trait and its shared request/response types
//! - the injected provider registry
//! - the Gmail and Aurinko implementations

pub mod aurinko;
pub mod gmail;
pub mod registry;
pub mod trait_;

pub use registry::{Registry, RegistryError};
pub use trait_::{
    AccountProfile, ConnectorError, ListParams, MailConnector, MessageListing, OutgoingMessage,
    RawMessage, TokenGrant, fetch_each,
};

pub use aurinko::{AurinkoAddress, AurinkoConnector, AurinkoMessage, register_aurinko_connector};
pub use gmail::{
    GmailBody, GmailConnector, GmailHeader, GmailMessage, GmailPayload, register_gmail_connector,
};
