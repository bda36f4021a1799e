//! # Mailsync
//!
//! Webmail backend core: provider connectors, the token lifecycle, the sync
//! reconciler that merges remote mail into local storage, and the HTTP API
//! over it.

pub mod ai;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod models;
pub mod normalization;
pub mod repositories;
pub mod server;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod token_manager;
pub use migration;
