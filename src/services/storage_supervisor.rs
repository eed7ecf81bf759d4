use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Backoff applied between connection attempts, doubling up to a ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    poll: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: INITIAL_DELAY,
            max: MAX_DELAY,
            poll: HEALTH_POLL_INTERVAL,
        }
    }
}

impl Backoff {
    /// First delay, ceiling and health poll interval.
    pub fn new(initial: Duration, max: Duration, poll: Duration) -> Self {
        Self { initial, max, poll }
    }

    fn next(&self, delay: Duration) -> Duration {
        (delay * 2).min(self.max)
    }
}

/// Keep a store installed in `state`, entering degraded mode while it is unreachable.
///
/// A connected store is polled with `health_check`; the first failure clears it
/// from the shared state and the loop goes back to connecting with backoff.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    run_with(state, connect, Backoff::default()).await
}

/// [`run`] with explicit timings.
pub async fn run_with<F, Fut>(state: SharedState, mut connect: F, backoff: Backoff)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut delay = backoff.initial;

    loop {
        if let Some(store) = state.room_store().await {
            match store.health_check().await {
                Ok(()) => {
                    delay = backoff.initial;
                    sleep(backoff.poll).await;
                }
                Err(err) => {
                    warn!(error = %err, "storage health check failed; entering degraded mode");
                    state.clear_room_store().await;
                    sleep(delay).await;
                    delay = backoff.next(delay);
                }
            }
            continue;
        }

        match connect().await {
            Ok(store) => {
                info!("storage connection established; leaving degraded mode");
                state.install_room_store(store).await;
                delay = backoff.initial;
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = backoff.next(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;

    use crate::{config::AppConfig, dao::room_store::MemoryStore, state::AppState};

    fn fast() -> Backoff {
        Backoff::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
    }

    async fn wait_for(state: &SharedState, degraded: bool) {
        let mut watcher = state.degraded_watcher();
        timeout(Duration::from_secs(2), watcher.wait_for(|value| *value == degraded))
            .await
            .expect("degraded flag never changed")
            .unwrap();
    }

    #[tokio::test]
    async fn retries_until_connected() {
        let state = AppState::new(AppConfig::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let task = tokio::spawn(run_with(
            state.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StorageError::unavailable(
                            "refused".into(),
                            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                        ))
                    } else {
                        Ok(Arc::new(MemoryStore::new()) as Arc<dyn RoomStore>)
                    }
                }
            },
            fast(),
        ));

        wait_for(&state, false).await;
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        task.abort();
    }

    #[tokio::test]
    async fn failed_health_check_enters_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let store = MemoryStore::new();
        let installed = store.clone();

        let task = tokio::spawn(run_with(
            state.clone(),
            move || {
                let installed = installed.clone();
                async move {
                    installed.health_check().await?;
                    Ok(Arc::new(installed) as Arc<dyn RoomStore>)
                }
            },
            fast(),
        ));

        wait_for(&state, false).await;
        store.set_offline(true);
        wait_for(&state, true).await;
        store.set_offline(false);
        wait_for(&state, false).await;
        task.abort();
    }
}
