//! Keyed collections folded from change feed notifications.

use std::{fmt::Debug, hash::Hash};

use indexmap::IndexMap;
use rand::{Rng, seq::SliceRandom};
use serde::{Serialize, de::DeserializeOwned};

use crate::dao::models::Table;
use crate::state::feed::FeedEvent;

/// Row type that can be replicated from a change feed.
pub trait Record: Clone {
    /// Primary key type as found in the store's key column.
    type Key: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned;
    /// Shape of the persisted row.
    type Row: DeserializeOwned;

    /// Table the record is replicated from.
    const TABLE: Table;

    /// Primary key of this record.
    fn key(&self) -> &Self::Key;

    /// Build a record from its persisted row.
    fn from_row(row: Self::Row) -> Self;

    /// Merge an incoming copy of the same row. Local-only attributes may be kept.
    fn absorb(&mut self, incoming: Self) {
        *self = incoming;
    }
}

/// What an event did to the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "key", rename_all = "snake_case")]
pub enum Applied<K> {
    /// A new key was appended.
    Inserted(K),
    /// An existing record was replaced.
    Updated(K),
    /// A record was removed.
    Deleted(K),
    /// The event had no effect.
    Unchanged,
}

impl<K> Applied<K> {
    /// Whether the collection changed.
    pub fn is_change(&self) -> bool {
        !matches!(self, Applied::Unchanged)
    }
}

/// Keyed collection folding feed events in delivery order.
///
/// Keys are unique and insertion order is kept; deletes preserve the relative
/// order of the remaining rows.
#[derive(Debug, Clone)]
pub struct Reconciler<R: Record> {
    items: IndexMap<R::Key, R>,
}

impl<R: Record> Default for Reconciler<R> {
    fn default() -> Self {
        Self {
            items: IndexMap::new(),
        }
    }
}

impl<R: Record> Reconciler<R> {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection with a snapshot. A repeated key keeps its first position.
    pub fn seed(&mut self, records: impl IntoIterator<Item = R>) {
        self.items.clear();
        for record in records {
            let key = record.key().clone();
            self.items.entry(key).or_insert(record);
        }
    }

    /// Fold one notification.
    ///
    /// An insert of a present key and an update or delete of an absent key leave
    /// the collection untouched and report [`Applied::Unchanged`].
    pub fn apply(&mut self, event: FeedEvent<R>) -> Applied<R::Key> {
        match event {
            FeedEvent::Insert(record) => {
                let key = record.key().clone();
                if self.items.contains_key(&key) {
                    return Applied::Unchanged;
                }
                self.items.insert(key.clone(), record);
                Applied::Inserted(key)
            }
            FeedEvent::Update(record) => {
                let key = record.key().clone();
                match self.items.get_mut(&key) {
                    Some(existing) => {
                        existing.absorb(record);
                        Applied::Updated(key)
                    }
                    None => Applied::Unchanged,
                }
            }
            FeedEvent::Delete(key) => match self.items.shift_remove(&key) {
                Some(_) => Applied::Deleted(key),
                None => Applied::Unchanged,
            },
        }
    }

    /// Local write: replace the record in place or append it.
    pub fn upsert(&mut self, record: R) -> Applied<R::Key> {
        let key = record.key().clone();
        match self.items.get_mut(&key) {
            Some(existing) => {
                *existing = record;
                Applied::Updated(key)
            }
            None => {
                self.items.insert(key.clone(), record);
                Applied::Inserted(key)
            }
        }
    }

    /// Record by key.
    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.items.get(key)
    }

    /// Mutable record by key, for local-only attributes.
    pub fn get_mut(&mut self, key: &R::Key) -> Option<&mut R> {
        self.items.get_mut(key)
    }

    /// Index of `key` in display order.
    pub fn position_of(&self, key: &R::Key) -> Option<usize> {
        self.items.get_index_of(key)
    }

    /// Record at `index` in display order.
    pub fn get_index(&self, index: usize) -> Option<&R> {
        self.items.get_index(index).map(|(_, record)| record)
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.items.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no record is held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Random permutation of the whole collection.
    pub fn shuffle<G: Rng + ?Sized>(&mut self, rng: &mut G) {
        let mut entries: Vec<(R::Key, R)> = self.items.drain(..).collect();
        entries.shuffle(rng);
        self.items = entries.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Row {
        id: u32,
        label: String,
    }

    impl Record for Row {
        type Key = u32;
        type Row = Row;
        const TABLE: Table = Table::Players;

        fn key(&self) -> &u32 {
            &self.id
        }

        fn from_row(row: Row) -> Self {
            row
        }
    }

    fn row(id: u32, label: &str) -> Row {
        Row {
            id,
            label: label.into(),
        }
    }

    fn labels(reconciler: &Reconciler<Row>) -> Vec<String> {
        reconciler.iter().map(|row| row.label.clone()).collect()
    }

    #[test]
    fn insert_of_existing_key_leaves_state_unchanged() {
        let mut reconciler = Reconciler::new();
        reconciler.seed([row(1, "a")]);

        let outcome = reconciler.apply(FeedEvent::Insert(row(1, "changed")));

        assert_eq!(outcome, Applied::Unchanged);
        assert_eq!(reconciler.len(), 1);
        assert_eq!(labels(&reconciler), vec!["a"]);
    }

    #[test]
    fn update_of_missing_key_is_ignored() {
        let mut reconciler: Reconciler<Row> = Reconciler::new();
        assert_eq!(
            reconciler.apply(FeedEvent::Update(row(9, "x"))),
            Applied::Unchanged
        );
        assert!(reconciler.is_empty());
    }

    #[test]
    fn delete_preserves_order_of_remaining_rows() {
        let mut reconciler = Reconciler::new();
        reconciler.seed([row(1, "a"), row(2, "b"), row(3, "c")]);

        assert_eq!(reconciler.apply(FeedEvent::Delete(2)), Applied::Deleted(2));
        assert_eq!(reconciler.apply(FeedEvent::Delete(2)), Applied::Unchanged);
        assert_eq!(labels(&reconciler), vec!["a", "c"]);
    }

    #[test]
    fn seed_keeps_first_occurrence_of_a_key() {
        let mut reconciler = Reconciler::new();
        reconciler.seed([row(1, "a"), row(2, "b"), row(1, "dup")]);
        assert_eq!(labels(&reconciler), vec!["a", "b"]);
    }

    #[test]
    fn no_event_sequence_produces_duplicate_keys() {
        let mut reconciler = Reconciler::new();
        let events = vec![
            FeedEvent::Insert(row(1, "a")),
            FeedEvent::Insert(row(2, "b")),
            FeedEvent::Insert(row(1, "a2")),
            FeedEvent::Update(row(2, "b2")),
            FeedEvent::Delete(1),
            FeedEvent::Insert(row(1, "a3")),
            FeedEvent::Insert(row(2, "b3")),
            FeedEvent::Update(row(3, "c")),
        ];
        for event in events {
            reconciler.apply(event);
            let mut keys: Vec<u32> = reconciler.iter().map(|row| row.id).collect();
            let total = keys.len();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), total);
        }
        assert_eq!(labels(&reconciler), vec!["b2", "a3"]);
    }

    #[test]
    fn replaying_the_same_events_is_deterministic() {
        let events = || {
            vec![
                FeedEvent::Insert(row(1, "a")),
                FeedEvent::Insert(row(2, "b")),
                FeedEvent::Update(row(1, "a2")),
                FeedEvent::Delete(2),
            ]
        };
        let mut left = Reconciler::new();
        let mut right = Reconciler::new();
        for event in events() {
            left.apply(event);
        }
        for event in events() {
            right.apply(event);
        }
        assert_eq!(labels(&left), labels(&right));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut reconciler = Reconciler::new();
        reconciler.seed((1..=20).map(|id| row(id, &id.to_string())));
        let mut rng = StdRng::seed_from_u64(7);

        reconciler.shuffle(&mut rng);

        let mut keys: Vec<u32> = reconciler.iter().map(|row| row.id).collect();
        assert_eq!(keys.len(), 20);
        keys.sort_unstable();
        assert_eq!(keys, (1..=20).collect::<Vec<_>>());
        assert_eq!(reconciler.get(&5).map(|row| row.label.as_str()), Some("5"));
    }
}
