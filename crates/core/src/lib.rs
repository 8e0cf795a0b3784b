//! Clipdo core data models.
//!
//! This crate defines the values, keys and configuration shared by the
//! storage layer and its consumers.

#![warn(missing_docs)]

mod backend;
pub mod codec;
mod config;
mod event;
mod keys;
mod session;

pub use backend::{BackendKind, ParseBackendKindError};
pub use config::{CloudConfig, ConfigError, CookieConfig, LocalConfig, StorageConfig};
pub use event::{ChangeEvent, ChangeOp, StorageEvent};
pub use keys::{PreservedKeys, INTERNAL_KEY_PREFIX, STORAGE_PREFERENCE_KEY, THEME_MODE_KEY};
pub use session::Session;

/// Any JSON-compatible value held under a storage key.
pub type StoredValue = serde_json::Value;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
