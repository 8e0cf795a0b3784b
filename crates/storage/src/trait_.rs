//! Backend trait abstraction.

use std::collections::BTreeMap;
use async_trait::async_trait;
use clipdo_core::{BackendKind, PreservedKeys, StoredValue};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error from the SQLite row store
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transport error talking to the remote row store
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote row store answered with a failure status
    #[error("remote store rejected request (status {status}): {body}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// A cookie would exceed the per-cookie size ceiling
    #[error("cookie {key:?} is {size} bytes, over the {limit} byte limit")]
    CookieTooLarge {
        /// Cookie name
        key: String,
        /// Encoded `name=value` size
        size: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Cloud operation attempted without a signed-in session
    #[error("no active session: sign in to use cloud storage")]
    NoSession,

    /// Storage used before the backend preference was loaded
    #[error("storage is not ready: bootstrap has not completed")]
    NotReady,

    /// A backend switch is already running
    #[error("a storage backend switch is already in progress")]
    SwitchInProgress,

    /// One or more keys could not be written to the destination backend
    #[error("migration failed for {} key(s): {}", failed.len(), failed.join(", "))]
    MigrationFailed {
        /// Keys that did not make it
        failed: Vec<String>,
    },

    /// Invalid backend name or configuration
    #[error("invalid backend configuration: {0}")]
    InvalidBackend(String),
}

/// Uniform key/value operations over one storage medium.
///
/// Values cross this boundary as JSON; each medium stores the codec's string
/// form. A key with no value, or with a value that no longer decodes, reads as
/// `None`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which medium this is.
    fn kind(&self) -> BackendKind;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Write a value.
    async fn set(&self, key: &str, value: &StoredValue) -> Result<()>;

    /// Delete a value. Deleting a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Every key with its raw encoded value.
    async fn list_all(&self) -> Result<BTreeMap<String, String>>;

    /// Delete every key not in `except`.
    async fn clear(&self, except: &PreservedKeys) -> Result<()>;
}
