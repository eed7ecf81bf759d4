/// In-process store.
pub mod memory;
/// PostgREST store with realtime change feeds.
#[cfg(feature = "postgrest-store")]
pub mod postgrest;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dao::{
    models::{Filter, Table},
    storage::StorageResult,
};

pub use self::memory::MemoryStore;

/// Identifier of a change feed subscription.
pub type SubscriptionId = Uuid;

/// Change notification exactly as delivered by the store, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    /// `INSERT`, `UPDATE` or `DELETE` for well-formed payloads.
    pub kind: String,
    /// Row after the change.
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the change (at least its key for deletes).
    #[serde(default)]
    pub old: Option<Value>,
}

impl RawChange {
    /// Notification for a freshly inserted row.
    pub fn insert(row: Value) -> Self {
        Self {
            kind: "INSERT".into(),
            new: Some(row),
            old: None,
        }
    }

    /// Notification for an updated row.
    pub fn update(new: Value, old: Value) -> Self {
        Self {
            kind: "UPDATE".into(),
            new: Some(new),
            old: Some(old),
        }
    }

    /// Notification for a removed row.
    pub fn delete(old: Value) -> Self {
        Self {
            kind: "DELETE".into(),
            new: None,
            old: Some(old),
        }
    }

    /// Row the notification is about, preferring the post-change image.
    pub fn row(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Live change feed for one table, filtered server side.
#[derive(Debug)]
pub struct Subscription {
    /// Identifier used to cancel delivery.
    pub id: SubscriptionId,
    /// Table being observed.
    pub table: Table,
    /// Notifications in store emission order. Ends when the subscription is dropped.
    pub events: mpsc::UnboundedReceiver<RawChange>,
}

/// Abstraction over the shared store holding rooms, players, questions and pointers.
///
/// Rows travel as JSON objects so the same trait fits any backend speaking the
/// store's schema; typed access lives in [`crate::dao::repository`].
pub trait RoomStore: Send + Sync {
    fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    fn insert(&self, table: Table, rows: Vec<Value>)
    -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    fn update(
        &self,
        table: Table,
        filter: Filter,
        patch: Value,
    ) -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    fn upsert(
        &self,
        table: Table,
        row: Value,
        conflict_key: &'static str,
    ) -> BoxFuture<'static, StorageResult<Value>>;
    fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    fn subscribe(
        &self,
        table: Table,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>>;
    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
