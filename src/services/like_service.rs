use tracing::{debug, info};

use crate::{
    dao::repository::RoomRepository,
    error::ServiceError,
    services::{identity::derive_player_id, room_events::broadcast_players, with_timeout},
    state::{RoomHandle, SessionContext, SharedState},
};

/// Like counter value read by one peer, waiting to be written back plus one.
///
/// Reading and writing are separate store round trips. Two peers that both
/// read `n` both write `n + 1`; the store keeps whichever write lands last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLike {
    player_id: String,
    room_id: String,
    observed: u32,
}

impl PendingLike {
    /// Player whose counter was read.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Counter value seen by [`read_likes`].
    pub fn observed(&self) -> u32 {
        self.observed
    }

    /// Write `observed + 1`. When `handle` is given the value is also applied locally.
    pub async fn commit(
        self,
        state: &SharedState,
        handle: Option<&RoomHandle>,
    ) -> Result<u32, ServiceError> {
        let repository = RoomRepository::new(state.require_store().await?);
        let likes = self.observed.saturating_add(1);

        let written = with_timeout(
            state.config().request_timeout(),
            repository.set_likes(&self.player_id, likes),
        )
        .await?
        .ok_or_else(|| player_not_found(&self.player_id))?;

        if let Some(handle) = handle {
            let applied = handle
                .mutate(|view, hub| {
                    view.set_likes(&written.id, written.likes)
                        .map(|change| broadcast_players(hub, change))
                        .is_some()
                })
                .await;
            if !matches!(applied, Ok(true)) {
                debug!(room_id = %self.room_id, player_id = %self.player_id, "like not applied locally");
            }
        }

        info!(room_id = %self.room_id, player_id = %self.player_id, likes = written.likes, "like recorded");
        Ok(written.likes)
    }
}

/// Read the counter of `player_id` on behalf of `session`.
///
/// Fails with [`ServiceError::SelfLike`] when the session is that player.
pub async fn read_likes(
    state: &SharedState,
    session: &SessionContext,
    room_id: &str,
    player_id: &str,
) -> Result<PendingLike, ServiceError> {
    if derive_player_id(&session.user_token, room_id) == player_id {
        return Err(ServiceError::SelfLike);
    }

    let repository = RoomRepository::new(state.require_store().await?);
    let player = with_timeout(state.config().request_timeout(), repository.player(player_id))
        .await?
        .ok_or_else(|| player_not_found(player_id))?;

    Ok(PendingLike {
        player_id: player.id,
        room_id: room_id.to_string(),
        observed: player.likes,
    })
}

/// Give `player_id` one more like. Returns the counter value written.
pub async fn increment_likes(
    state: &SharedState,
    session: &SessionContext,
    room_id: &str,
    player_id: &str,
    handle: Option<&RoomHandle>,
) -> Result<u32, ServiceError> {
    read_likes(state, session, room_id, player_id)
        .await?
        .commit(state, handle)
        .await
}

fn player_not_found(player_id: &str) -> ServiceError {
    ServiceError::NotFound(format!("player {player_id}"))
}
