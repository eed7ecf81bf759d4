use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, RwLock, broadcast},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    dao::{repository::RoomRepository, room_store::SubscriptionId},
    dto::{events::RoomChange, room::RoomSnapshot},
    error::ServiceError,
    state::{hub::ChangeHub, room::RoomView},
};

/// Live, reconciled view of one room.
///
/// Cloning is cheap and every clone observes the same state. Feed tasks keep a
/// clone alive, so [`RoomHandle::close`] must be called to release the room.
#[derive(Clone)]
pub struct RoomHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    room_id: String,
    repository: RoomRepository,
    view: RwLock<RoomView>,
    hub: ChangeHub,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transition_gate: Mutex<()>,
    request_timeout: Duration,
    import_delimiter: String,
}

impl RoomHandle {
    pub(crate) fn new(room_id: &str, repository: RoomRepository, config: &AppConfig) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                room_id: room_id.to_string(),
                repository,
                view: RwLock::new(RoomView::new(room_id)),
                hub: ChangeHub::new(config.notification_capacity()),
                subscriptions: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                transition_gate: Mutex::new(()),
                request_timeout: config.request_timeout(),
                import_delimiter: config.import_delimiter().to_string(),
            }),
        }
    }

    /// Room this handle replicates.
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    /// Receive every subsequent [`RoomChange`].
    pub fn subscribe(&self) -> broadcast::Receiver<RoomChange> {
        self.inner.hub.subscribe()
    }

    /// [`RoomHandle::subscribe`] as a `Stream`.
    pub fn changes(&self) -> BroadcastStream<RoomChange> {
        self.inner.hub.stream()
    }

    /// Copy of the current view.
    pub async fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot::from(&*self.inner.view.read().await)
    }

    /// Run `f` against the current view.
    pub async fn read<T>(&self, f: impl FnOnce(&RoomView) -> T) -> T {
        let view = self.inner.view.read().await;
        f(&*view)
    }

    /// Whether [`RoomHandle::close`] ran.
    pub async fn is_closed(&self) -> bool {
        self.inner.view.read().await.is_closed()
    }

    /// Mutate the view and publish notifications while holding the write lock.
    ///
    /// Fails with [`ServiceError::Closed`] once the handle is closed, so late
    /// completions never touch the view or reach observers.
    pub(crate) async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut RoomView, &ChangeHub) -> T,
    ) -> Result<T, ServiceError> {
        let mut view = self.inner.view.write().await;
        if view.is_closed() {
            return Err(ServiceError::Closed);
        }
        Ok(f(&mut view, &self.inner.hub))
    }

    pub(crate) fn repository(&self) -> &RoomRepository {
        &self.inner.repository
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    pub(crate) fn import_delimiter(&self) -> &str {
        &self.inner.import_delimiter
    }

    /// Serializes optimistic pointer moves on this handle.
    pub(crate) fn transition_gate(&self) -> &Mutex<()> {
        &self.inner.transition_gate
    }

    /// Take ownership of feed subscriptions and the tasks draining them.
    pub(crate) async fn track(&self, subscriptions: Vec<SubscriptionId>, tasks: Vec<JoinHandle<()>>) {
        self.inner.subscriptions.lock().await.extend(subscriptions);
        self.inner.tasks.lock().await.extend(tasks);
    }

    /// Stop replicating the room.
    ///
    /// The view is marked closed under its write lock first; once this returns
    /// no notification is emitted and no state changes. Closing twice is a no-op.
    pub async fn close(&self) {
        {
            let mut view = self.inner.view.write().await;
            if !view.close() {
                return;
            }
        }

        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock().await);
        let store = self.inner.repository.store();
        for id in subscriptions {
            if let Err(err) = store.unsubscribe(id).await {
                warn!(room_id = %self.inner.room_id, subscription = %id, error = %err, "failed to unsubscribe feed");
            }
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        debug!(room_id = %self.inner.room_id, tasks = tasks.len(), "stopping feed tasks");
        for task in tasks {
            task.abort();
        }

        info!(room_id = %self.inner.room_id, "room handle closed");
    }
}
