//! Quiz room observer: keeps one room replicated and logs every change.

use std::{env, sync::Arc};

use anyhow::Context;
use serde::Serialize;
use tokio_stream::{StreamExt, wrappers::errors::BroadcastStreamRecvError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizroom_sync::{
    config::{AppConfig, StoreConfig},
    dao::{
        room_store::{MemoryStore, RoomStore},
        storage::StorageError,
    },
    services::{
        storage_supervisor,
        sync_service::{close_room, open_room},
    },
    state::AppState,
};

const ROOM_ID_ENV: &str = "QUIZROOM_ROOM_ID";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let room_id = env::var(ROOM_ID_ENV).with_context(|| format!("{ROOM_ID_ENV} is not set"))?;
    let config = AppConfig::load();
    let store_config = config.store().clone();
    let state = AppState::new(config);

    let memory = MemoryStore::new();
    let supervisor = tokio::spawn(storage_supervisor::run(state.clone(), move || {
        let store_config = store_config.clone();
        let memory = memory.clone();
        async move { connect_store(store_config, memory).await }
    }));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut degraded = state.degraded_watcher();
    tokio::select! {
        ready = degraded.wait_for(|degraded| !*degraded) => {
            ready.context("storage supervisor stopped")?;
        }
        _ = &mut shutdown => {
            info!("shutdown requested before storage became available");
            supervisor.abort();
            return Ok(());
        }
    }

    let handle = open_room(&state, &room_id)
        .await
        .with_context(|| format!("opening room `{room_id}`"))?;
    log_snapshot(&handle.snapshot().await, "room replicated");

    let mut changes = handle.changes();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            next = changes.next() => match next {
                Some(Ok(change)) => {
                    info!(room_id = %room_id, change = %to_json(&change), "room changed");
                    log_snapshot(&handle.snapshot().await, "room snapshot");
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(room_id = %room_id, skipped, "observer fell behind room changes");
                }
                None => break,
            },
        }
    }

    close_room(&handle).await;
    supervisor.abort();
    Ok(())
}

async fn connect_store(
    store: StoreConfig,
    memory: MemoryStore,
) -> Result<Arc<dyn RoomStore>, StorageError> {
    match store {
        StoreConfig::Memory => Ok(Arc::new(memory)),
        #[cfg(feature = "postgrest-store")]
        StoreConfig::Postgrest {
            base_url,
            realtime_url,
            api_key,
        } => {
            use quizroom_sync::dao::room_store::postgrest::{PostgrestConfig, PostgrestStore};

            let config = PostgrestConfig::new(base_url, realtime_url, api_key);
            let store = PostgrestStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgrest-store"))]
        StoreConfig::Postgrest { .. } => Err(StorageError::unavailable(
            "built without the `postgrest-store` feature".into(),
            std::io::Error::from(std::io::ErrorKind::Unsupported),
        )),
    }
}

fn log_snapshot<T: Serialize>(snapshot: &T, message: &'static str) {
    info!(snapshot = %to_json(snapshot), "{message}");
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unserializable: {err}>"))
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
