use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::dao::{
    models::{
        CurrentQuestionEntity, Filter, LikesPatch, NewQuestionEntity, PlayerEntity,
        QuestionEntity, RoomEntity, Table,
    },
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

/// Typed facade over a [`RoomStore`], one method per query the services issue.
#[derive(Clone)]
pub struct RoomRepository {
    store: Arc<dyn RoomStore>,
}

impl RoomRepository {
    /// Wrap an untyped store.
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// Underlying untyped store.
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Rooms created by `owner_token`.
    pub async fn rooms_owned_by(&self, owner_token: &str) -> StorageResult<Vec<RoomEntity>> {
        let rows = self
            .store
            .select(Table::Rooms, Filter::eq("usertoken", owner_token))
            .await?;
        decode_rows(Table::Rooms, rows)
    }

    /// Room by id.
    pub async fn room(&self, room_id: &str) -> StorageResult<Option<RoomEntity>> {
        let rows = self
            .store
            .select(Table::Rooms, Filter::eq("id", room_id))
            .await?;
        first(Table::Rooms, rows)
    }

    /// Store a new room and return the stored row.
    pub async fn insert_room(&self, room: &RoomEntity) -> StorageResult<RoomEntity> {
        let rows = self
            .store
            .insert(Table::Rooms, vec![encode(Table::Rooms, room)?])
            .await?;
        first(Table::Rooms, rows)?
            .ok_or_else(|| StorageError::rejected(Table::Rooms, "insert returned no row"))
    }

    /// Remove every row of `table` scoped to `room_id`. Returns how many went.
    pub async fn delete_room_rows(&self, table: Table, room_id: &str) -> StorageResult<usize> {
        let rows = self.store.delete(table, Filter::room(table, room_id)).await?;
        Ok(rows.len())
    }

    /// Remove the room row itself. Room-scoped rows are left to [`Self::delete_room_rows`].
    pub async fn delete_room(&self, room_id: &str) -> StorageResult<Vec<RoomEntity>> {
        let rows = self
            .store
            .delete(Table::Rooms, Filter::eq("id", room_id))
            .await?;
        decode_rows(Table::Rooms, rows)
    }

    /// Players of `room_id`.
    pub async fn players(&self, room_id: &str) -> StorageResult<Vec<PlayerEntity>> {
        let rows = self
            .store
            .select(Table::Players, Filter::room(Table::Players, room_id))
            .await?;
        decode_rows(Table::Players, rows)
    }

    /// Player by id, whatever room it belongs to.
    pub async fn player(&self, player_id: &str) -> StorageResult<Option<PlayerEntity>> {
        let rows = self
            .store
            .select(Table::Players, Filter::eq("id", player_id))
            .await?;
        first(Table::Players, rows)
    }

    /// Store a new player and return the stored row.
    pub async fn insert_player(&self, player: &PlayerEntity) -> StorageResult<PlayerEntity> {
        let rows = self
            .store
            .insert(Table::Players, vec![encode(Table::Players, player)?])
            .await?;
        first(Table::Players, rows)?
            .ok_or_else(|| StorageError::rejected(Table::Players, "insert returned no row"))
    }

    /// Overwrite the like counter. `None` when the player no longer exists.
    pub async fn set_likes(
        &self,
        player_id: &str,
        likes: u32,
    ) -> StorageResult<Option<PlayerEntity>> {
        let patch = encode(Table::Players, &LikesPatch { likes })?;
        let rows = self
            .store
            .update(Table::Players, Filter::eq("id", player_id), patch)
            .await?;
        first(Table::Players, rows)
    }

    /// Remove a player from `room_id`. Returns the removed rows.
    pub async fn delete_player(
        &self,
        room_id: &str,
        player_id: &str,
    ) -> StorageResult<Vec<PlayerEntity>> {
        let filter = Filter::room(Table::Players, room_id).and_eq("id", player_id);
        let rows = self.store.delete(Table::Players, filter).await?;
        decode_rows(Table::Players, rows)
    }

    /// Questions of `room_id` in store order.
    pub async fn questions(&self, room_id: &str) -> StorageResult<Vec<QuestionEntity>> {
        let rows = self
            .store
            .select(Table::Questions, Filter::room(Table::Questions, room_id))
            .await?;
        decode_rows(Table::Questions, rows)
    }

    /// Store a question; the store assigns its id.
    pub async fn insert_question(
        &self,
        question: &NewQuestionEntity,
    ) -> StorageResult<QuestionEntity> {
        let rows = self
            .store
            .insert(Table::Questions, vec![encode(Table::Questions, question)?])
            .await?;
        first(Table::Questions, rows)?
            .ok_or_else(|| StorageError::rejected(Table::Questions, "insert returned no row"))
    }

    /// Remove one question of `room_id`. Returns the removed rows.
    pub async fn delete_question(
        &self,
        room_id: &str,
        question_id: i64,
    ) -> StorageResult<Vec<QuestionEntity>> {
        let filter = Filter::room(Table::Questions, room_id).and_eq("id", question_id);
        let rows = self.store.delete(Table::Questions, filter).await?;
        decode_rows(Table::Questions, rows)
    }

    /// Pointer row of `room_id`, if one was ever written.
    pub async fn current_question(
        &self,
        room_id: &str,
    ) -> StorageResult<Option<CurrentQuestionEntity>> {
        let rows = self
            .store
            .select(
                Table::CurrentQuestion,
                Filter::room(Table::CurrentQuestion, room_id),
            )
            .await?;
        first(Table::CurrentQuestion, rows)
    }

    /// Point the room at `pointer.content`, creating the row on first use.
    pub async fn upsert_current_question(
        &self,
        pointer: &CurrentQuestionEntity,
    ) -> StorageResult<CurrentQuestionEntity> {
        let row = encode(Table::CurrentQuestion, pointer)?;
        let stored = self
            .store
            .upsert(
                Table::CurrentQuestion,
                row,
                Table::CurrentQuestion.primary_key(),
            )
            .await?;
        serde_json::from_value(stored)
            .map_err(|source| StorageError::decode(Table::CurrentQuestion, source))
    }
}

fn encode<T: Serialize>(table: Table, value: &T) -> StorageResult<Value> {
    serde_json::to_value(value).map_err(|source| StorageError::decode(table, source))
}

fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> StorageResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|source| StorageError::decode(table, source)))
        .collect()
}

fn first<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> StorageResult<Option<T>> {
    rows.into_iter()
        .next()
        .map(|row| serde_json::from_value(row).map_err(|source| StorageError::decode(table, source)))
        .transpose()
}
