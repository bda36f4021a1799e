//! # Repository Layer
//!
//! Repositories encapsulate SeaORM operations per entity. Sync writes are
//! upserts keyed by provider identifiers, never blind inserts.

pub mod email;
pub mod linked_account;
pub mod thread;
pub mod user;

pub use email::{EmailRecord, EmailRepository};
pub use linked_account::{LinkedAccountRepository, NewLinkedAccount};
pub use thread::{FolderCounts, ThreadRecord, ThreadRepository, ThreadWithLatest};
pub use user::UserRepository;
