use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dao::models::RoomEntity,
    dto::validation::validate_not_blank,
    state::room::{Player, Question, RoomView},
};

/// Payload describing the room an organizer wants to open.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoomRequest {
    /// Display name, trimmed before storage.
    #[validate(
        length(min = 1, max = 120),
        custom(function = "validate_not_blank")
    )]
    pub name: String,
    /// Whether joining requires the PIN.
    #[serde(default)]
    pub is_private: bool,
}

/// Room as listed to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    /// Ten character room id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether joining requires the PIN.
    pub is_private: bool,
    /// Empty for public rooms.
    pub pin: String,
}

impl From<RoomEntity> for RoomSummary {
    fn from(value: RoomEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            is_private: value.is_private,
            pin: value.pin,
        }
    }
}

/// Point-in-time copy of everything a room handle replicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    /// Room the snapshot was taken from.
    pub room_id: String,
    /// Players in arrival order.
    pub players: Vec<Player>,
    /// Questions in display order.
    pub questions: Vec<Question>,
    /// Selected question ids, in selection order.
    pub selected: Vec<i64>,
    /// Text on screen, if any.
    pub current_question: Option<String>,
}

impl From<&RoomView> for RoomSnapshot {
    fn from(view: &RoomView) -> Self {
        Self {
            room_id: view.room_id().to_string(),
            players: view.players().iter().cloned().collect(),
            questions: view.questions().iter().cloned().collect(),
            selected: view.selected().iter().copied().collect(),
            current_question: view.current_content().map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateRoomRequest {
        CreateRoomRequest {
            name: name.into(),
            is_private: false,
        }
    }

    #[test]
    fn room_names_must_not_be_blank() {
        assert!(request("Friday quiz").validate().is_ok());
        assert!(request("").validate().is_err());
        assert!(request("    ").validate().is_err());
    }

    #[test]
    fn room_names_are_bounded() {
        assert!(request(&"x".repeat(120)).validate().is_ok());
        assert!(request(&"x".repeat(121)).validate().is_err());
    }
}
