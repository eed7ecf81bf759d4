use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{Filter, Table},
        repository::RoomRepository,
        room_store::{RawChange, RoomStore, SubscriptionId},
    },
    error::ServiceError,
    services::{
        room_events::{
            broadcast_current_question, broadcast_feed_lost, broadcast_players,
            broadcast_questions, broadcast_rejected, broadcast_reloaded, broadcast_seeded,
        },
        with_timeout,
    },
    state::{
        ChangeHub, RoomHandle, SharedState,
        feed::FeedEvent,
        reconciler::Record,
        room::{CurrentQuestion, Player, Question, RoomView},
    },
};

const FEEDS: [Table; 3] = [Table::Players, Table::Questions, Table::CurrentQuestion];

/// Start replicating `room_id`.
///
/// Feeds are subscribed before the initial fetch so that changes racing with
/// the fetch are buffered and applied on top of the seed. Any failure releases
/// the subscriptions taken so far.
pub async fn open_room(state: &SharedState, room_id: &str) -> Result<RoomHandle, ServiceError> {
    let store = state.require_store().await?;
    let config = state.config();
    let handle = RoomHandle::new(room_id, RoomRepository::new(store.clone()), config);

    let mut subscriptions = Vec::with_capacity(FEEDS.len());
    for table in FEEDS {
        let subscribed = with_timeout(
            config.request_timeout(),
            store.subscribe(table, Filter::room(table, room_id)),
        )
        .await;
        match subscribed {
            Ok(subscription) => subscriptions.push(subscription),
            Err(err) => {
                warn!(room_id, collection = %table, error = %err, "failed to subscribe room feed");
                release(&store, subscriptions.iter().map(|s| s.id)).await;
                return Err(err);
            }
        }
    }

    let repository = handle.repository();
    let fetched = tokio::try_join!(
        with_timeout(config.request_timeout(), repository.players(room_id)),
        with_timeout(config.request_timeout(), repository.questions(room_id)),
        with_timeout(config.request_timeout(), repository.current_question(room_id)),
    );
    let (players, questions, current) = match fetched {
        Ok(rows) => rows,
        Err(err) => {
            warn!(room_id, error = %err, "failed to fetch room state");
            release(&store, subscriptions.iter().map(|s| s.id)).await;
            return Err(err);
        }
    };

    handle
        .mutate(|view, hub| {
            view.seed(players, questions, current);
            broadcast_seeded(hub, view.players().len(), view.questions().len());
        })
        .await?;

    let ids: Vec<SubscriptionId> = subscriptions.iter().map(|s| s.id).collect();
    let mut tasks = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        let task = match subscription.table {
            Table::Players => spawn_feed::<Player, _>(handle.clone(), subscription.events, |view, hub, event| {
                broadcast_players(hub, view.apply_player(event));
            }),
            Table::Questions => spawn_feed::<Question, _>(handle.clone(), subscription.events, |view, hub, event| {
                broadcast_questions(hub, view.apply_question(event));
            }),
            Table::CurrentQuestion => {
                spawn_feed::<CurrentQuestion, _>(handle.clone(), subscription.events, |view, hub, event| {
                    if let Some(content) = view.apply_current(event) {
                        broadcast_current_question(hub, content);
                    }
                })
            }
            Table::Rooms => continue,
        };
        tasks.push(task);
    }
    handle.track(ids, tasks).await;

    info!(room_id, "room opened");
    Ok(handle)
}

/// Stop replicating the room behind `handle`.
pub async fn close_room(handle: &RoomHandle) {
    handle.close().await;
}

/// Re-fetch the question list from scratch, resetting visibility and selection.
pub async fn reload_questions(handle: &RoomHandle) -> Result<usize, ServiceError> {
    let questions = with_timeout(
        handle.request_timeout(),
        handle.repository().questions(handle.room_id()),
    )
    .await?;

    handle
        .mutate(|view, hub| {
            view.reseed_questions(questions);
            let count = view.questions().len();
            broadcast_reloaded(hub, count);
            count
        })
        .await
}

/// Drain one feed into the handle until it ends or the handle closes.
fn spawn_feed<R, F>(
    handle: RoomHandle,
    mut events: mpsc::UnboundedReceiver<RawChange>,
    route: F,
) -> JoinHandle<()>
where
    R: Record + Send + 'static,
    R::Key: Send,
    F: Fn(&mut RoomView, &ChangeHub, FeedEvent<R>) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(raw) = events.recv().await {
            let outcome = match FeedEvent::<R>::decode(raw) {
                Ok(event) => handle.mutate(|view, hub| route(view, hub, event)).await,
                Err(err) => {
                    handle
                        .mutate(|_, hub| broadcast_rejected(hub, R::TABLE, err.to_string()))
                        .await
                }
            };
            if outcome.is_err() {
                debug!(room_id = handle.room_id(), collection = %R::TABLE, "feed stopped after close");
                return;
            }
        }

        let _ = handle
            .mutate(|_, hub| broadcast_feed_lost(hub, R::TABLE))
            .await;
    })
}

async fn release(store: &Arc<dyn RoomStore>, ids: impl Iterator<Item = SubscriptionId>) {
    for id in ids {
        if let Err(err) = store.unsubscribe(id).await {
            warn!(subscription = %id, error = %err, "failed to release subscription");
        }
    }
}
