//! Mail crate - full-mailbox sync into encrypted local storage
//!
//! This crate provides:
//! - Domain models (FetchedMessage, MessageRecord, SyncCheckpoint)
//! - Gmail API client and per-user OAuth token refresh
//! - Field-level encryption for stored message text
//! - Storage trait abstractions with SQLite and in-memory backends
//! - The sync coordinator: single-flight runs, progress and cancellation
//!
//! All I/O is blocking, so the crate can be driven from any executor.

pub mod config;
pub mod crypto;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::{GmailCredentials, SyncOptions};
pub use crypto::{AesGcmEncryptor, EncryptionError, FieldEncryptor};
pub use gmail::{GmailAuth, GmailClient, MailTransport, StoredToken, TransportError};
pub use models::{
    Account, FetchedMessage, LabelId, MessageId, MessageRecord, SyncCheckpoint, ThreadId,
};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{
    CancelOutcome, CancelToken, JobRegistry, ProgressSnapshot, StartSyncError, SyncCoordinator,
    SyncPhase, SyncReport, SyncStarted, SyncStatus,
};
