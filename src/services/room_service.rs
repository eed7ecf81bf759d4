use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        models::{PlayerEntity, RoomEntity, Table},
        repository::RoomRepository,
    },
    dto::room::{CreateRoomRequest, RoomSummary},
    error::ServiceError,
    services::{
        identity::{derive_player_id, new_room_id, pin_for},
        with_timeout,
    },
    state::{SessionContext, SharedState, room::Player},
};

const ROOM_SCOPED: [Table; 3] = [Table::Players, Table::Questions, Table::CurrentQuestion];

/// Create a room owned by `session`.
pub async fn create_room(
    state: &SharedState,
    session: &SessionContext,
    request: CreateRoomRequest,
) -> Result<RoomSummary, ServiceError> {
    request.validate()?;

    let room = RoomEntity {
        id: new_room_id(&session.user_token),
        name: request.name.trim().to_string(),
        is_private: request.is_private,
        owner_token: session.user_token.clone(),
        pin: pin_for(request.is_private),
    };

    let repository = repository(state).await?;
    let stored = with_timeout(state.config().request_timeout(), repository.insert_room(&room)).await?;

    info!(room_id = %stored.id, private = stored.is_private, "room created");
    Ok(stored.into())
}

/// Rooms owned by `session`.
pub async fn list_rooms(
    state: &SharedState,
    session: &SessionContext,
) -> Result<Vec<RoomSummary>, ServiceError> {
    let repository = repository(state).await?;
    let rooms = with_timeout(
        state.config().request_timeout(),
        repository.rooms_owned_by(&session.user_token),
    )
    .await?;
    Ok(rooms.into_iter().map(RoomSummary::from).collect())
}

/// Look a room up by id. A missing room is not an error.
pub async fn find_room(state: &SharedState, room_id: &str) -> Result<Option<RoomSummary>, ServiceError> {
    let repository = repository(state).await?;
    let room = with_timeout(state.config().request_timeout(), repository.room(room_id)).await?;
    Ok(room.map(RoomSummary::from))
}

/// Tear a room down together with its players, questions and pointer.
pub async fn delete_room(
    state: &SharedState,
    session: &SessionContext,
    room_id: &str,
) -> Result<(), ServiceError> {
    let repository = repository(state).await?;
    let timeout = state.config().request_timeout();

    for table in ROOM_SCOPED {
        let removed = with_timeout(timeout, repository.delete_room_rows(table, room_id)).await?;
        debug!(room_id, collection = %table, removed, "room rows deleted");
    }
    let removed = with_timeout(timeout, repository.delete_room(room_id)).await?;
    if removed.is_empty() {
        return Err(ServiceError::NotFound(format!("room {room_id}")));
    }

    info!(room_id, owner = %session.user_token, "room deleted");
    Ok(())
}

/// Join `room_id` as `session`. Joining twice returns the existing player.
pub async fn join_room(
    state: &SharedState,
    session: &SessionContext,
    room_id: &str,
) -> Result<Player, ServiceError> {
    let user_name = session.display_name.trim();
    if user_name.is_empty() {
        return Err(ServiceError::InvalidInput("display name must not be blank".into()));
    }

    let repository = repository(state).await?;
    let timeout = state.config().request_timeout();
    let player_id = derive_player_id(&session.user_token, room_id);

    if let Some(existing) = with_timeout(timeout, repository.player(&player_id)).await? {
        // Ids are truncated, so long tokens map to the same id in every room.
        if existing.room_id != room_id {
            warn!(room_id, player_id = %existing.id, bound_to = %existing.room_id, "player id collision");
            return Err(ServiceError::InvalidState(format!(
                "player id {} already bound to room {}",
                existing.id, existing.room_id
            )));
        }
        return Ok(existing.into());
    }

    let player = PlayerEntity {
        id: player_id,
        user_token: session.user_token.clone(),
        room_id: room_id.to_string(),
        user_name: user_name.to_string(),
        likes: 0,
    };
    let stored = with_timeout(timeout, repository.insert_player(&player)).await?;

    info!(room_id, player_id = %stored.id, "player joined");
    Ok(stored.into())
}

/// Remove a participant from a room.
pub async fn kick_player(state: &SharedState, room_id: &str, player_id: &str) -> Result<(), ServiceError> {
    let repository = repository(state).await?;
    let removed = with_timeout(
        state.config().request_timeout(),
        repository.delete_player(room_id, player_id),
    )
    .await?;
    if removed.is_empty() {
        return Err(ServiceError::NotFound(format!("player {player_id}")));
    }

    info!(room_id, player_id, "player kicked");
    Ok(())
}

async fn repository(state: &SharedState) -> Result<RoomRepository, ServiceError> {
    Ok(RoomRepository::new(state.require_store().await?))
}
