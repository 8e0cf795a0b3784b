//! Moving user data between backends.
//!
//! The source stays the system of record until every destination write has
//! been confirmed. Only then is it cleared. If any write fails, the keys that
//! were written are removed from the destination again and the source is left
//! untouched.
//!
//! [`copy_keys`] is the first half on its own, for callers that must commit
//! something else before the source may be cleared.

use clipdo_core::{codec, PreservedKeys};
use tracing::{debug, info, warn};
use super::{Backend, Result, StorageError};

/// What a migration moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Keys written to the destination
    pub migrated: Vec<String>,
    /// Preserved or internal keys left behind
    pub skipped: Vec<String>,
    /// Keys whose stored value no longer decodes (dropped)
    pub undecodable: Vec<String>,
}

/// Copy every migratable key from `from` to `to`, leaving `from` untouched.
///
/// If any write fails, keys already written are removed from `to` again and
/// [`StorageError::MigrationFailed`] names the keys that did not make it.
pub async fn copy_keys(
    from: &dyn Backend,
    to: &dyn Backend,
    preserved: &PreservedKeys,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    if from.kind() == to.kind() {
        return Ok(report);
    }

    let snapshot = from.list_all().await?;
    debug!("copying {} key(s) from {} to {}", snapshot.len(), from.kind(), to.kind());

    let mut failed = Vec::new();
    for (key, raw) in &snapshot {
        if !preserved.is_migratable(key) {
            report.skipped.push(key.clone());
            continue;
        }
        let Some(value) = codec::decode(raw) else {
            warn!("Dropping undecodable value for {} during migration", key);
            report.undecodable.push(key.clone());
            continue;
        };
        match to.set(key, &value).await {
            Ok(()) => report.migrated.push(key.clone()),
            Err(e) => {
                warn!("Failed to migrate {} to {}: {}", key, to.kind(), e);
                failed.push(key.clone());
            }
        }
    }

    if !failed.is_empty() {
        discard_copies(to, &report).await;
        return Err(StorageError::MigrationFailed { failed });
    }
    Ok(report)
}

/// Remove the keys a [`copy_keys`] run wrote to `to`.
pub async fn discard_copies(to: &dyn Backend, report: &MigrationReport) {
    for key in &report.migrated {
        if let Err(e) = to.remove(key).await {
            warn!("Failed to roll back {} on {}: {}", key, to.kind(), e);
        }
    }
}

/// Move every migratable key from `from` to `to`, then clear `from`.
pub async fn migrate(
    from: &dyn Backend,
    to: &dyn Backend,
    preserved: &PreservedKeys,
) -> Result<MigrationReport> {
    if from.kind() == to.kind() {
        return Ok(MigrationReport::default());
    }
    let report = copy_keys(from, to, preserved).await?;
    from.clear(preserved).await?;
    info!(
        "Migrated {} key(s) from {} to {}",
        report.migrated.len(),
        from.kind(),
        to.kind()
    );
    Ok(report)
}
