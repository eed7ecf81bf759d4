//! In-process room store with a change feed.
//!
//! Mutations and feed emission happen under the same lock, so every
//! subscriber observes changes in mutation order.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{RawChange, RoomStore, Subscription, SubscriptionId};
use crate::dao::{
    models::{Filter, Table},
    storage::{StorageError, StorageResult},
};

/// In-process [`RoomStore`] used by default and in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tables: Mutex<Tables>,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    offline: AtomicBool,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<Table, Vec<Value>>,
    last_question_id: i64,
}

struct Subscriber {
    table: Table,
    filter: Filter,
    tx: mpsc::UnboundedSender<RawChange>,
}

impl MemoryStore {
    /// Empty store, online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) connectivity: every operation fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Snapshot of every row in `table`, in insertion order.
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.inner
            .lock_tables()
            .rows
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Deliver a raw notification to matching subscribers without touching any row.
    pub fn inject(&self, table: Table, change: RawChange) {
        let _tables = self.inner.lock_tables();
        self.inner.emit(table, change);
    }
}

impl MemoryInner {
    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store is offline".into(),
                io::Error::from(io::ErrorKind::NotConnected),
            ));
        }
        Ok(())
    }

    fn emit(&self, table: Table, change: RawChange) {
        self.subscribers.retain(|_, subscriber| {
            if subscriber.table != table {
                return true;
            }
            match change.row() {
                Some(row) if subscriber.filter.matches(row) => {
                    subscriber.tx.send(change.clone()).is_ok()
                }
                _ => true,
            }
        });
    }

    fn select(&self, table: Table, filter: &Filter) -> StorageResult<Vec<Value>> {
        self.ensure_online()?;
        let tables = self.lock_tables();
        Ok(tables
            .rows
            .get(&table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default())
    }

    fn insert(&self, table: Table, rows: Vec<Value>) -> StorageResult<Vec<Value>> {
        self.ensure_online()?;
        let mut tables = self.lock_tables();
        let key = table.primary_key();

        let mut next_id = tables.last_question_id;
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let mut object = into_object(table, row)?;
            if table == Table::Questions {
                match object.get(key).and_then(Value::as_i64) {
                    Some(explicit) => next_id = next_id.max(explicit),
                    None => {
                        next_id += 1;
                        object.insert(key.into(), Value::from(next_id));
                    }
                }
            }
            let row = Value::Object(object);
            let Some(id) = row.get(key).cloned() else {
                return Err(StorageError::rejected(table, format!("missing `{key}`")));
            };
            let existing = tables.rows.get(&table).map(Vec::as_slice).unwrap_or(&[]);
            let clashes = existing.iter().chain(prepared.iter()).any(|other: &Value| {
                other.get(key) == Some(&id)
            });
            if clashes {
                return Err(StorageError::rejected(
                    table,
                    format!("duplicate key `{key}` = {id}"),
                ));
            }
            prepared.push(row);
        }

        tables.last_question_id = next_id;
        let rows = tables.rows.entry(table).or_default();
        rows.extend(prepared.iter().cloned());
        for row in &prepared {
            self.emit(table, RawChange::insert(row.clone()));
        }
        debug!(%table, count = prepared.len(), "memory store insert");
        Ok(prepared)
    }

    fn update(&self, table: Table, filter: &Filter, patch: Value) -> StorageResult<Vec<Value>> {
        self.ensure_online()?;
        let patch = into_object(table, patch)?;
        let mut tables = self.lock_tables();
        let mut changes = Vec::new();
        if let Some(rows) = tables.rows.get_mut(&table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                let old = row.clone();
                if let Value::Object(fields) = row {
                    for (column, value) in &patch {
                        fields.insert(column.clone(), value.clone());
                    }
                }
                changes.push((row.clone(), old));
            }
        }

        let updated = changes.iter().map(|(new, _)| new.clone()).collect();
        for (new, old) in changes {
            self.emit(table, RawChange::update(new, old));
        }
        Ok(updated)
    }

    fn upsert(&self, table: Table, row: Value, conflict_key: &str) -> StorageResult<Value> {
        self.ensure_online()?;
        let object = into_object(table, row)?;
        let Some(conflict_value) = object.get(conflict_key).cloned() else {
            return Err(StorageError::rejected(
                table,
                format!("upsert row is missing conflict key `{conflict_key}`"),
            ));
        };

        let mut tables = self.lock_tables();
        let rows = tables.rows.entry(table).or_default();
        match rows
            .iter_mut()
            .find(|existing| existing.get(conflict_key) == Some(&conflict_value))
        {
            Some(existing) => {
                let old = existing.clone();
                if let Value::Object(fields) = existing {
                    fields.extend(object);
                }
                let new = existing.clone();
                self.emit(table, RawChange::update(new.clone(), old));
                Ok(new)
            }
            None => {
                let new = Value::Object(object);
                rows.push(new.clone());
                self.emit(table, RawChange::insert(new.clone()));
                Ok(new)
            }
        }
    }

    fn delete(&self, table: Table, filter: &Filter) -> StorageResult<Vec<Value>> {
        self.ensure_online()?;
        let mut tables = self.lock_tables();
        let mut removed = Vec::new();
        if let Some(rows) = tables.rows.get_mut(&table) {
            rows.retain(|row| {
                if filter.matches(row) {
                    removed.push(row.clone());
                    false
                } else {
                    true
                }
            });
        }
        for row in &removed {
            self.emit(table, RawChange::delete(row.clone()));
        }
        Ok(removed)
    }

    fn subscribe(&self, table: Table, filter: Filter) -> StorageResult<Subscription> {
        self.ensure_online()?;
        let _tables = self.lock_tables();
        let (tx, events) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.insert(id, Subscriber { table, filter, tx });
        debug!(%table, subscription = %id, "memory store subscription opened");
        Ok(Subscription { id, table, events })
    }
}

fn into_object(table: Table, value: Value) -> StorageResult<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(StorageError::rejected(
            table,
            format!("expected a JSON object, got {other}"),
        )),
    }
}

impl RoomStore for MemoryStore {
    fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.inner.select(table, &filter) })
    }

    fn insert(
        &self,
        table: Table,
        rows: Vec<Value>,
    ) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.inner.insert(table, rows) })
    }

    fn update(
        &self,
        table: Table,
        filter: Filter,
        patch: Value,
    ) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.inner.update(table, &filter, patch) })
    }

    fn upsert(
        &self,
        table: Table,
        row: Value,
        conflict_key: &'static str,
    ) -> BoxFuture<'static, StorageResult<Value>> {
        let store = self.clone();
        Box::pin(async move { store.inner.upsert(table, row, conflict_key) })
    }

    fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.inner.delete(table, &filter) })
    }

    fn subscribe(
        &self,
        table: Table,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move { store.inner.subscribe(table, filter) })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let _tables = store.inner.lock_tables();
            store.inner.subscribers.remove(&id);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ensure_online() })
    }
}
