use tracing::{trace, warn};

use crate::{
    dao::models::Table,
    dto::events::RoomChange,
    state::{ChangeHub, reconciler::Applied},
};

/// Announce that every collection was loaded from scratch.
pub fn broadcast_seeded(hub: &ChangeHub, players: usize, questions: usize) {
    send(hub, RoomChange::Seeded { players, questions });
}

/// Announce a player change. No-ops are not announced.
pub fn broadcast_players(hub: &ChangeHub, change: Applied<String>) {
    if change.is_change() {
        send(hub, RoomChange::Players { change });
    }
}

/// Announce a question change. No-ops are not announced.
pub fn broadcast_questions(hub: &ChangeHub, change: Applied<i64>) {
    if change.is_change() {
        send(hub, RoomChange::Questions { change });
    }
}

/// Announce the text now on screen.
pub fn broadcast_current_question(hub: &ChangeHub, content: Option<String>) {
    send(hub, RoomChange::CurrentQuestion { content });
}

/// Announce a shuffle of the question list.
pub fn broadcast_reordered(hub: &ChangeHub) {
    send(hub, RoomChange::QuestionsReordered);
}

/// Announce a fresh question list.
pub fn broadcast_reloaded(hub: &ChangeHub, questions: usize) {
    send(hub, RoomChange::QuestionsReloaded { questions });
}

/// Announce a visibility or selection flip.
pub fn broadcast_annotation(hub: &ChangeHub, question_id: i64) {
    send(hub, RoomChange::LocalAnnotation { question_id });
}

/// Report a refused feed notification.
pub fn broadcast_rejected(hub: &ChangeHub, table: Table, reason: String) {
    warn!(collection = %table, %reason, "rejected malformed feed event");
    send(
        hub,
        RoomChange::Rejected {
            collection: table.name(),
            reason,
        },
    );
}

/// Report a feed that ended while its handle was still open.
pub fn broadcast_feed_lost(hub: &ChangeHub, table: Table) {
    warn!(collection = %table, "change feed ended unexpectedly");
    send(
        hub,
        RoomChange::FeedLost {
            collection: table.name(),
        },
    );
}

fn send(hub: &ChangeHub, change: RoomChange) {
    let receivers = hub.broadcast(change);
    trace!(receivers, "room change published");
}
