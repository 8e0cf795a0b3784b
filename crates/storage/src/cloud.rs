//! Cloud storage over user-scoped rows.
//!
//! Each key is one row `(owner_id, key, value)` in a relational store reached
//! through [`RowStore`]. Every operation needs a signed-in [`Session`]; without
//! one the backend fails fast with [`StorageError::NoSession`].

use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use clipdo_core::{
    codec, BackendKind, ChangeEvent, ChangeOp, PreservedKeys, Session, StorageConfig, StoredValue,
    Time,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use super::{Backend, Result, StorageError, RestRowStore, SqliteRowStore};

const FEED_CAPACITY: usize = 256;

/// One stored key as it crosses the row store boundary.
///
/// Field names on the wire are snake_case column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRow {
    /// Owning identity
    #[serde(rename = "owner_id")]
    pub owner: String,
    /// Storage key
    pub key: String,
    /// Stored value
    pub value: StoredValue,
    /// Last write time, when the store reports it
    #[serde(rename = "updated_at", default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<Time>,
}

/// Relational store holding cloud rows.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Table holding the rows.
    fn table(&self) -> &str;

    /// Change notifications for this store.
    fn changes(&self) -> &ChangeFeed;

    /// Load the row for `key` owned by the session user.
    async fn fetch(&self, session: &Session, key: &str) -> Result<Option<CloudRow>>;

    /// Load every row owned by the session user.
    async fn fetch_all(&self, session: &Session) -> Result<Vec<CloudRow>>;

    /// Insert or overwrite a row.
    async fn upsert(&self, session: &Session, row: &CloudRow) -> Result<()>;

    /// Delete the row for `key`, if any.
    async fn delete(&self, session: &Session, key: &str) -> Result<()>;

    /// Delete every row of the session user whose key is not in `keep`.
    async fn delete_except(&self, session: &Session, keep: &[String]) -> Result<()>;
}

/// Best-effort broadcast of row changes.
///
/// Delivery is at most once: a receiver that falls behind loses events.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Announce a change. Dropped silently when nobody listens.
    pub fn publish(&self, table: &str, owner_id: &str, op: ChangeOp, key: Option<&str>) {
        let _ = self.tx.send(ChangeEvent {
            table: table.to_string(),
            owner_id: owner_id.to_string(),
            op,
            key: key.map(str::to_string),
        });
    }

    /// Listen for changes to rows of `owner_id` in `table`.
    pub fn subscribe(&self, table: &str, owner_id: &str) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
            table: table.to_string(),
            owner_id: owner_id.to_string(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of a [`ChangeFeed`], scoped to one table and owner.
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
    table: String,
    owner_id: String,
}

impl ChangeSubscription {
    /// Wait for the next matching change, or `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.table == self.table && event.owner_id == self.owner_id => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("change subscription lagged, {} event(s) dropped", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a matching change if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.table == self.table && event.owner_id == self.owner_id => {
                    return Some(event);
                }
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Cloud storage backend.
pub struct CloudBackend {
    store: Arc<dyn RowStore>,
    session: RwLock<Option<Session>>,
}

impl CloudBackend {
    /// Create a backend over `store`.
    pub fn new(store: Arc<dyn RowStore>, session: Option<Session>) -> Self {
        Self {
            store,
            session: RwLock::new(session),
        }
    }

    /// Create a backend from the cloud section of `config`.
    ///
    /// A configured `url` selects the REST store; otherwise rows live in SQLite
    /// at `sqlite_path`, or `cloud.db` under the data directory.
    pub async fn from_config(config: &StorageConfig, session: Option<Session>) -> Result<Self> {
        let cloud = &config.cloud;
        let store: Arc<dyn RowStore> = match &cloud.url {
            Some(url) => Arc::new(RestRowStore::new(
                url.clone(),
                cloud.api_key.clone().unwrap_or_default(),
                cloud.table().to_string(),
                cloud.timeout(),
            )?),
            None => {
                let path = cloud
                    .sqlite_path
                    .clone()
                    .unwrap_or_else(|| config.data_dir.join("cloud.db"));
                Arc::new(SqliteRowStore::open(&path, cloud.table()).await?)
            }
        };
        Ok(Self::new(store, session))
    }

    /// Sign in or out.
    pub async fn set_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }

    /// Current session, if signed in.
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Listen for out-of-band changes to the signed-in user's rows.
    pub async fn subscribe(&self) -> Result<ChangeSubscription> {
        let session = self.require_session().await?;
        Ok(self.store.changes().subscribe(self.store.table(), &session.user_id))
    }

    async fn require_session(&self) -> Result<Session> {
        self.session.read().await.clone().ok_or(StorageError::NoSession)
    }
}

#[async_trait]
impl Backend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let session = self.require_session().await?;
        Ok(self.store.fetch(&session, key).await?.map(|row| row.value))
    }

    async fn set(&self, key: &str, value: &StoredValue) -> Result<()> {
        let session = self.require_session().await?;
        debug!("cloud set {}", key);
        let row = CloudRow {
            owner: session.user_id.clone(),
            key: key.to_string(),
            value: value.clone(),
            updated: Some(chrono::Utc::now()),
        };
        self.store.upsert(&session, &row).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let session = self.require_session().await?;
        debug!("cloud remove {}", key);
        self.store.delete(&session, key).await
    }

    async fn list_all(&self) -> Result<BTreeMap<String, String>> {
        let session = self.require_session().await?;
        Ok(self
            .store
            .fetch_all(&session)
            .await?
            .into_iter()
            .map(|row| (row.key, codec::encode(&row.value)))
            .collect())
    }

    async fn clear(&self, except: &PreservedKeys) -> Result<()> {
        let session = self.require_session().await?;
        let keep: Vec<String> = except.iter().map(str::to_string).collect();
        self.store.delete_except(&session, &keep).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn backend(user: &str) -> (Arc<SqliteRowStore>, CloudBackend) {
        let store = Arc::new(SqliteRowStore::in_memory("storage").await.unwrap());
        let backend = CloudBackend::new(store.clone(), Some(Session::new(user, "token")));
        (store, backend)
    }

    #[test]
    fn test_row_wire_names() {
        let row = CloudRow {
            owner: "u1".to_string(),
            key: "todos".to_string(),
            value: json!([1]),
            updated: None,
        };
        let wire = serde_json::to_value(&row).unwrap();
        assert_eq!(wire, json!({"owner_id": "u1", "key": "todos", "value": [1]}));

        let back: CloudRow = serde_json::from_value(json!({
            "owner_id": "u1",
            "key": "todos",
            "value": [1],
            "updated_at": "2026-01-02T03:04:05Z",
        }))
        .unwrap();
        assert_eq!(back.owner, "u1");
        assert!(back.updated.is_some());
    }

    #[tokio::test]
    async fn test_no_session_fails_fast() {
        let store = Arc::new(SqliteRowStore::in_memory("storage").await.unwrap());
        let backend = CloudBackend::new(store, None);

        assert!(matches!(backend.get("todos").await, Err(StorageError::NoSession)));
        assert!(matches!(backend.set("todos", &json!(1)).await, Err(StorageError::NoSession)));
        assert!(matches!(backend.remove("todos").await, Err(StorageError::NoSession)));
        assert!(matches!(backend.list_all().await, Err(StorageError::NoSession)));
        assert!(matches!(
            backend.clear(&PreservedKeys::default()).await,
            Err(StorageError::NoSession)
        ));
        assert!(matches!(backend.subscribe().await, Err(StorageError::NoSession)));
    }

    #[tokio::test]
    async fn test_rows_are_scoped_to_owner() {
        let (store, alice) = backend("alice").await;
        let bob = CloudBackend::new(store, Some(Session::new("bob", "token")));

        alice.set("todos", &json!(["alice's"])).await.unwrap();
        bob.set("todos", &json!(["bob's"])).await.unwrap();
        bob.set("clipboard", &json!([])).await.unwrap();

        assert_eq!(alice.get("todos").await.unwrap(), Some(json!(["alice's"])));
        assert_eq!(alice.list_all().await.unwrap().len(), 1);

        alice.clear(&PreservedKeys::default()).await.unwrap();
        assert_eq!(alice.get("todos").await.unwrap(), None);
        assert_eq!(bob.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sign_out_blocks_access() {
        let (_store, backend) = backend("alice").await;
        backend.set("todos", &json!([1])).await.unwrap();

        backend.set_session(None).await;
        assert!(matches!(backend.get("todos").await, Err(StorageError::NoSession)));

        backend.set_session(Some(Session::new("alice", "fresh"))).await;
        assert_eq!(backend.get("todos").await.unwrap(), Some(json!([1])));
    }

    #[tokio::test]
    async fn test_changes_from_another_device() {
        let (store, laptop) = backend("alice").await;
        let phone = CloudBackend::new(store.clone(), Some(Session::new("alice", "token")));
        let stranger = CloudBackend::new(store, Some(Session::new("mallory", "token")));

        let mut changes = laptop.subscribe().await.unwrap();

        stranger.set("todos", &json!([])).await.unwrap();
        phone.set("todos", &json!(["from phone"])).await.unwrap();
        phone.set("todos", &json!(["edited"])).await.unwrap();
        phone.remove("todos").await.unwrap();

        let ops: Vec<ChangeOp> = std::iter::from_fn(|| changes.try_recv()).map(|e| e.op).collect();
        assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete]);
    }
}
