use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::dto::events::RoomChange;

/// Broadcast hub fanning room notifications out to every observer of a handle.
pub struct ChangeHub {
    sender: broadcast::Sender<RoomChange>,
}

impl ChangeHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomChange> {
        self.sender.subscribe()
    }

    /// Same as [`ChangeHub::subscribe`], as a `Stream`. Lagging observers get a `Lagged` item.
    pub fn stream(&self) -> BroadcastStream<RoomChange> {
        BroadcastStream::new(self.subscribe())
    }

    /// Send a notification to all current subscribers. Returns how many received it.
    pub fn broadcast(&self, change: RoomChange) -> usize {
        self.sender.send(change).unwrap_or(0)
    }
}
