//! The single entry point for storage calls.
//!
//! A [`StorageCoordinator`] owns the three backends and remembers which one is
//! active. It starts `Uninitialized` and rejects every call until
//! [`bootstrap`](StorageCoordinator::bootstrap) has read the persisted backend
//! preference.
//!
//! Switching backends runs the migration and then broadcasts
//! [`StorageEvent::Reloaded`]; consumers re-read their keys on that event.
//! The source backend is cleared only after the new preference is persisted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use clipdo_core::{
    codec, BackendKind, PreservedKeys, Session, StorageConfig, StorageEvent, StoredValue,
    STORAGE_PREFERENCE_KEY,
};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use super::{copy_keys, discard_copies, Backend, CloudBackend, CookieBackend, LocalBackend, Result, StorageError};

const EVENT_CAPACITY: usize = 16;

/// The three storage mediums.
#[derive(Clone)]
pub struct Backends {
    /// Cookie medium
    pub cookie: Arc<dyn Backend>,
    /// Local medium; also holds the backend preference
    pub local: Arc<dyn Backend>,
    /// Cloud medium
    pub cloud: Arc<dyn Backend>,
}

impl Backends {
    /// Open every medium described by `config`.
    pub async fn open(config: &StorageConfig, session: Option<Session>) -> Result<Self> {
        Ok(Self {
            cookie: Arc::new(CookieBackend::from_config(config).await?),
            local: Arc::new(LocalBackend::from_config(config).await?),
            cloud: Arc::new(CloudBackend::from_config(config, session).await?),
        })
    }

    /// The backend for `kind`.
    pub fn get(&self, kind: BackendKind) -> &Arc<dyn Backend> {
        match kind {
            BackendKind::Cookie => &self.cookie,
            BackendKind::Local => &self.local,
            BackendKind::Cloud => &self.cloud,
        }
    }
}

/// Result of [`StorageCoordinator::change_backend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Target was already active; nothing happened.
    Unchanged,
    /// Data moved and the target is now active.
    Switched {
        /// Previous backend
        from: BackendKind,
        /// New backend
        to: BackendKind,
        /// Number of keys moved
        migrated: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Ready(BackendKind),
}

/// Routes storage calls to the active backend and runs backend switches.
pub struct StorageCoordinator {
    backends: Backends,
    preserved: PreservedKeys,
    default_backend: BackendKind,
    phase: RwLock<Phase>,
    migrating: AtomicBool,
    events: broadcast::Sender<StorageEvent>,
}

impl StorageCoordinator {
    /// Create an uninitialized coordinator.
    pub fn new(backends: Backends, preserved: PreservedKeys) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backends,
            preserved,
            default_backend: BackendKind::default(),
            phase: RwLock::new(Phase::Uninitialized),
            migrating: AtomicBool::new(false),
            events,
        }
    }

    /// Backend used when no preference has been persisted.
    pub fn with_default_backend(mut self, kind: BackendKind) -> Self {
        self.default_backend = kind;
        self
    }

    /// Open every medium from `config` and bootstrap.
    pub async fn open(config: &StorageConfig, session: Option<Session>) -> Result<Self> {
        let backends = Backends::open(config, session).await?;
        let coordinator = Self::new(backends, config.preserved_keys())
            .with_default_backend(config.default_backend);
        coordinator.bootstrap().await?;
        Ok(coordinator)
    }

    /// Load the persisted backend preference and become ready.
    pub async fn bootstrap(&self) -> Result<BackendKind> {
        let stored = self.backends.local.get(STORAGE_PREFERENCE_KEY).await?;
        let active = match stored.as_ref().and_then(StoredValue::as_str) {
            Some(name) => name.parse::<BackendKind>().unwrap_or_else(|e| {
                warn!("{}; falling back to {}", e, self.default_backend);
                self.default_backend
            }),
            None => self.default_backend,
        };
        *self.phase.write().await = Phase::Ready(active);
        info!("Storage ready on {} backend", active);
        Ok(active)
    }

    /// Whether bootstrap has completed.
    pub async fn is_ready(&self) -> bool {
        matches!(*self.phase.read().await, Phase::Ready(_))
    }

    /// Whether a backend switch is running.
    pub fn is_migrating(&self) -> bool {
        self.migrating.load(Ordering::Acquire)
    }

    /// The active backend kind.
    pub async fn active_backend(&self) -> Result<BackendKind> {
        match *self.phase.read().await {
            Phase::Ready(kind) => Ok(kind),
            Phase::Uninitialized => Err(StorageError::NotReady),
        }
    }

    /// Keys exempt from clears and migration.
    pub fn preserved_keys(&self) -> &PreservedKeys {
        &self.preserved
    }

    /// Receive switch notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    async fn active(&self) -> Result<&Arc<dyn Backend>> {
        Ok(self.backends.get(self.active_backend().await?))
    }

    /// Read a value from the active backend.
    pub async fn get_item(&self, key: &str) -> Result<Option<StoredValue>> {
        self.active().await?.get(key).await
    }

    /// Read a value as `T`; a value of the wrong shape reads as absent.
    pub async fn get_item_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .get_item(key)
            .await?
            .and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Write a value to the active backend.
    pub async fn set_item(&self, key: &str, value: &StoredValue) -> Result<()> {
        self.active().await?.set(key, value).await
    }

    /// Remove a value from the active backend.
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.active().await?.remove(key).await
    }

    /// Remove everything but the preserved keys from the active backend.
    pub async fn clear_all(&self) -> Result<()> {
        self.active().await?.clear(&self.preserved).await
    }

    /// Every decodable value in the active backend.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, StoredValue>> {
        Ok(self
            .active()
            .await?
            .list_all()
            .await?
            .into_iter()
            .filter_map(|(k, raw)| codec::decode(&raw).map(|v| (k, v)))
            .collect())
    }

    /// Move user data to `target` and make it the active backend.
    ///
    /// Switching to the active backend does nothing. A second switch while one
    /// is running is rejected with [`StorageError::SwitchInProgress`]. On
    /// failure the previous backend stays active and
    /// [`StorageEvent::SwitchFailed`] is broadcast.
    pub async fn change_backend(&self, target: BackendKind) -> Result<SwitchOutcome> {
        if self.active_backend().await? == target {
            debug!("{} backend already active", target);
            return Ok(SwitchOutcome::Unchanged);
        }
        let Some(from) = self.begin_switch(target).await? else {
            debug!("{} backend became active while waiting", target);
            return Ok(SwitchOutcome::Unchanged);
        };

        info!("Switching storage backend {} -> {}", from, target);
        let result = self.switch(from, target).await;
        self.migrating.store(false, Ordering::Release);

        match result {
            Ok(migrated) => {
                let _ = self.events.send(StorageEvent::Reloaded { from, to: target });
                Ok(SwitchOutcome::Switched { from, to: target, migrated })
            }
            Err(e) => {
                error!("Storage backend switch {} -> {} failed: {}", from, target, e);
                let _ = self.events.send(StorageEvent::SwitchFailed {
                    from,
                    to: target,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Take the switch guard and read the active backend under it.
    ///
    /// Returns `None`, with the guard released, when `target` is already active.
    async fn begin_switch(&self, target: BackendKind) -> Result<Option<BackendKind>> {
        if self
            .migrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StorageError::SwitchInProgress);
        }
        // A switch that finished before we took the guard may have moved the data.
        match self.active_backend().await {
            Ok(from) if from != target => Ok(Some(from)),
            other => {
                self.migrating.store(false, Ordering::Release);
                other.map(|_| None)
            }
        }
    }

    async fn switch(&self, from: BackendKind, target: BackendKind) -> Result<usize> {
        let source = self.backends.get(from);
        let destination = self.backends.get(target);

        // Stale data from an earlier stay on the destination must not come back.
        destination.clear(&self.preserved).await?;
        let report = copy_keys(source.as_ref(), destination.as_ref(), &self.preserved).await?;

        if let Err(e) = self
            .backends
            .local
            .set(STORAGE_PREFERENCE_KEY, &StoredValue::from(target.as_str()))
            .await
        {
            discard_copies(destination.as_ref(), &report).await;
            return Err(e);
        }
        *self.phase.write().await = Phase::Ready(target);

        // Committed: the destination is the system of record from here on.
        if let Err(e) = source.clear(&self.preserved).await {
            warn!("Switched to {} but could not clear {}: {}", target, from, e);
        }
        info!("Moved {} key(s) from {} to {}", report.migrated.len(), from, target);
        Ok(report.migrated.len())
    }
}
