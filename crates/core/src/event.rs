//! Notifications emitted by the storage layer.

use serde::{Deserialize, Serialize};
use crate::BackendKind;

/// Coordinator-level events broadcast to every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEvent {
    /// The active backend changed; consumers must re-read their keys.
    Reloaded {
        /// Previous backend
        from: BackendKind,
        /// New active backend
        to: BackendKind,
    },
    /// A backend switch failed and the previous backend stays active.
    SwitchFailed {
        /// Backend that stays active
        from: BackendKind,
        /// Backend the switch targeted
        to: BackendKind,
        /// Human-readable failure
        reason: String,
    },
}

/// Kind of row change seen on the cloud change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    /// Row created
    Insert,
    /// Row overwritten
    Update,
    /// Row removed
    Delete,
}

/// "Something changed" notice for a cloud row.
///
/// The payload is advisory; re-fetch the key instead of trusting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the row lives in
    pub table: String,
    /// Owning identity
    pub owner_id: String,
    /// What happened
    pub op: ChangeOp,
    /// Affected key, when known
    pub key: Option<String>,
}
