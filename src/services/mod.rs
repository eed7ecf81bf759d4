use std::{future::Future, time::Duration};

use tokio::time::timeout;

use crate::{dao::storage::StorageResult, error::ServiceError};

/// Short codes for rooms, players and PINs.
pub mod identity;
/// Like counter read-modify-write.
pub mod like_service;
/// Question navigation, visibility, selection and imports.
pub mod question_service;
/// Room notification helpers.
pub mod room_events;
/// Room creation, listing, joining and kicking.
pub mod room_service;
/// Store reconnection loop driving degraded mode.
pub mod storage_supervisor;
/// Room replication lifecycle.
pub mod sync_service;

/// Run a store request with an upper bound on its duration.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    work: impl Future<Output = StorageResult<T>>,
) -> Result<T, ServiceError> {
    match timeout(limit, work).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ServiceError::Timeout),
    }
}
