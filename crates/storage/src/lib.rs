//! Storage abstraction and migration for Clipdo.
//!
//! Three interchangeable mediums (cookies, local files, cloud rows) sit behind
//! the [`Backend`] trait. A [`StorageCoordinator`] routes every call to the one
//! active medium and moves user data across when the active medium changes.

#![warn(missing_docs)]

pub mod trait_;
pub mod cookie;
pub mod local;
pub mod cloud;
pub mod rest_store;
pub mod sqlite_store;
pub mod migration;
pub mod coordinator;

pub use trait_::{Backend, StorageError, Result};
pub use cookie::CookieBackend;
pub use local::LocalBackend;
pub use cloud::{ChangeFeed, ChangeSubscription, CloudBackend, CloudRow, RowStore};
pub use rest_store::RestRowStore;
pub use sqlite_store::SqliteRowStore;
pub use migration::{copy_keys, discard_copies, migrate, MigrationReport};
pub use coordinator::{Backends, StorageCoordinator, SwitchOutcome};
