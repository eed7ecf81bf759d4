use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tables exposed by the room store. Names match the backing schema verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Rooms owned by an organizer.
    Rooms,
    /// Participants that joined a room.
    Players,
    /// Questions prepared for a room.
    Questions,
    /// Single "on screen" pointer per room.
    CurrentQuestion,
}

impl Table {
    /// Name of the table in the store.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Rooms => "rooms",
            Table::Players => "players",
            Table::Questions => "questions",
            Table::CurrentQuestion => "current_question",
        }
    }

    /// Column identifying a row uniquely.
    pub const fn primary_key(self) -> &'static str {
        match self {
            Table::CurrentQuestion => "room_id",
            _ => "id",
        }
    }

    /// Column scoping rows to a room.
    pub const fn room_column(self) -> &'static str {
        match self {
            Table::Rooms => "id",
            _ => "room_id",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conjunction of `column = value` equalities scoping a store operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching rows whose `column` equals `value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    /// Add another equality clause.
    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((column.into(), value.into()));
        self
    }

    /// Filter scoping `table` rows to a single room.
    pub fn room(table: Table, room_id: &str) -> Self {
        Self::eq(table.room_column(), room_id)
    }

    /// Equality clauses in declaration order.
    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Whether `row` satisfies every clause.
    pub fn matches(&self, row: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Room row. The owner token and privacy flag keep the store's column names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Short code derived from the owner token and the creation instant.
    pub id: String,
    /// Display name chosen by the organizer.
    pub name: String,
    /// Private rooms carry a PIN.
    #[serde(rename = "isprivate")]
    pub is_private: bool,
    /// Opaque token of the organizer who created the room.
    #[serde(rename = "usertoken")]
    pub owner_token: String,
    /// Four digit PIN, empty for public rooms.
    #[serde(default)]
    pub pin: String,
}

/// Player row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Short code derived from `(user_token, room_id)`.
    pub id: String,
    /// Opaque token of the participant.
    pub user_token: String,
    /// Room the participant joined.
    pub room_id: String,
    /// Display name captured at join time.
    pub user_name: String,
    /// Likes received from peers.
    #[serde(default)]
    pub likes: u32,
}

/// Question row as returned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Identifier assigned by the store.
    pub id: i64,
    /// Room the question belongs to.
    pub room_id: String,
    /// Question text.
    pub content: String,
}

/// Question row before the store assigns an identifier.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewQuestionEntity {
    /// Room the question belongs to.
    pub room_id: String,
    /// Question text.
    pub content: String,
}

/// Current question pointer row, one per room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentQuestionEntity {
    /// Room the pointer belongs to (conflict key for upserts).
    pub room_id: String,
    /// Text of the question currently on screen.
    pub content: String,
}

/// Patch applied to a player row when its like counter is written back.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LikesPatch {
    /// New absolute like count.
    pub likes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn room_entity_keeps_store_column_names() {
        let room = RoomEntity {
            id: "abcdef0123".into(),
            name: "Friday quiz".into(),
            is_private: true,
            owner_token: "user_1".into(),
            pin: "4821".into(),
        };

        let value = serde_json::to_value(&room).unwrap();
        assert_eq!(value["isprivate"], json!(true));
        assert_eq!(value["usertoken"], json!("user_1"));
        assert!(value.get("is_private").is_none());
    }

    #[test]
    fn filter_matches_every_clause() {
        let filter = Filter::eq("room_id", "r1").and_eq("id", 7);
        assert!(filter.matches(&json!({"room_id": "r1", "id": 7, "content": "x"})));
        assert!(!filter.matches(&json!({"room_id": "r1", "id": 8})));
        assert!(!filter.matches(&json!({"id": 7})));
        assert!(Filter::all().matches(&json!({})));
    }

    #[test]
    fn pointer_table_is_keyed_by_room() {
        assert_eq!(Table::CurrentQuestion.primary_key(), "room_id");
        assert_eq!(Table::Questions.primary_key(), "id");
        assert_eq!(Table::Rooms.room_column(), "id");
    }
}
