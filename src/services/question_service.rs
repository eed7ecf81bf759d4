use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    dao::models::{CurrentQuestionEntity, NewQuestionEntity},
    error::ServiceError,
    services::{
        room_events::{
            broadcast_annotation, broadcast_current_question, broadcast_questions,
            broadcast_reordered,
        },
        with_timeout,
    },
    state::{
        ChangeHub, RoomHandle,
        navigator::{NavOutcome, next_target, split_batch},
        pointer::{AbortError, Plan, Rollback},
        room::{Question, RoomView},
    },
};

/// Put question `question_id` on screen.
///
/// The pointer is updated locally first, then upserted. When the store write
/// fails the local pointer is restored, unless the feed replaced it meanwhile.
pub async fn show_question(handle: &RoomHandle, question_id: i64) -> Result<String, ServiceError> {
    let _gate = handle.transition_gate().lock().await;

    let plan = handle
        .mutate(|view, hub| -> Result<Plan, ServiceError> {
            let target = content_of(view, question_id)?;
            plan_move(view, hub, target)
        })
        .await??;

    write_pointer(handle, plan).await
}

/// Advance the pointer to the next visible question, wrapping around once.
///
/// The target is chosen and planned under the same lock, so it is always
/// relative to the pointer on display.
pub async fn next_question(handle: &RoomHandle) -> Result<NavOutcome, ServiceError> {
    let _gate = handle.transition_gate().lock().await;

    let plan = handle
        .mutate(|view, hub| -> Result<Option<Plan>, ServiceError> {
            let Some(question_id) = next_target(view.questions(), view.current_content()) else {
                return Ok(None);
            };
            let target = content_of(view, question_id)?;
            plan_move(view, hub, target).map(Some)
        })
        .await??;

    match plan {
        Some(plan) => write_pointer(handle, plan).await.map(NavOutcome::Shown),
        None => {
            debug!(room_id = handle.room_id(), "no visible question to advance to");
            Ok(NavOutcome::NoAdvance)
        }
    }
}

fn content_of(view: &RoomView, question_id: i64) -> Result<String, ServiceError> {
    view.question(question_id)
        .map(|question| question.content.clone())
        .ok_or_else(|| question_not_found(question_id))
}

fn plan_move(view: &mut RoomView, hub: &ChangeHub, target: String) -> Result<Plan, ServiceError> {
    let plan = view.plan_pointer(target)?;
    broadcast_current_question(hub, Some(plan.target.clone()));
    Ok(plan)
}

/// Persist a planned move. Callers hold the transition gate.
async fn write_pointer(handle: &RoomHandle, plan: Plan) -> Result<String, ServiceError> {
    let pointer = CurrentQuestionEntity {
        room_id: handle.room_id().to_string(),
        content: plan.target.clone(),
    };
    let written = with_timeout(
        handle.request_timeout(),
        handle.repository().upsert_current_question(&pointer),
    )
    .await;

    match written {
        Ok(_) => {
            if let Ok(Err(err)) = handle.mutate(|view, _| view.confirm_pointer(plan.id)).await {
                warn!(room_id = handle.room_id(), plan_id = %plan.id, error = %err, "failed to confirm pointer move");
            }
            debug!(
                room_id = handle.room_id(),
                elapsed_ms = plan.pending_since.elapsed().as_millis() as u64,
                "pointer move acknowledged"
            );
            Ok(plan.target)
        }
        Err(err) => {
            warn!(room_id = handle.room_id(), target = %plan.target, error = %err, "pointer write failed; rolling back");
            roll_back(handle, &plan).await;
            Err(err)
        }
    }
}

/// Randomly reorder the question list. The pointer is left alone.
pub async fn shuffle_questions(handle: &RoomHandle) -> Result<(), ServiceError> {
    handle
        .mutate(|view, hub| {
            view.shuffle_questions(&mut rand::rng());
            broadcast_reordered(hub);
        })
        .await
}

/// [`shuffle_questions`] with a caller supplied generator.
pub async fn shuffle_questions_with<G: Rng + ?Sized>(
    handle: &RoomHandle,
    rng: &mut G,
) -> Result<(), ServiceError> {
    handle
        .mutate(|view, hub| {
            view.shuffle_questions(rng);
            broadcast_reordered(hub);
        })
        .await
}

/// Flip whether `next` may land on the question. Returns the new flag.
pub async fn toggle_visibility(handle: &RoomHandle, question_id: i64) -> Result<bool, ServiceError> {
    handle
        .mutate(|view, hub| {
            let shown = view.toggle_visibility(question_id)?;
            broadcast_annotation(hub, question_id);
            Some(shown)
        })
        .await?
        .ok_or_else(|| question_not_found(question_id))
}

/// Flip whether the question is selected. Returns the new membership.
pub async fn toggle_selection(handle: &RoomHandle, question_id: i64) -> Result<bool, ServiceError> {
    handle
        .mutate(|view, hub| {
            let selected = view.toggle_selection(question_id)?;
            broadcast_annotation(hub, question_id);
            Some(selected)
        })
        .await?
        .ok_or_else(|| question_not_found(question_id))
}

/// Split `raw` and persist each token as a question, in order.
///
/// Rows are applied locally as each insert is acknowledged. A failure stops
/// the batch; rows already imported stay and the error reports how many.
pub async fn import_questions(
    handle: &RoomHandle,
    raw: &str,
    delimiter: Option<&str>,
) -> Result<usize, ServiceError> {
    let tokens = split_batch(raw, delimiter.unwrap_or(handle.import_delimiter()));
    let total = tokens.len();

    for (imported, content) in tokens.into_iter().enumerate() {
        let question = NewQuestionEntity {
            room_id: handle.room_id().to_string(),
            content,
        };
        let stored = match with_timeout(
            handle.request_timeout(),
            handle.repository().insert_question(&question),
        )
        .await
        {
            Ok(stored) => stored,
            Err(source) => {
                warn!(room_id = handle.room_id(), imported, total, error = %source, "question import interrupted");
                return Err(ServiceError::PartialImport {
                    imported,
                    total,
                    source: Box::new(source),
                });
            }
        };

        handle
            .mutate(|view, hub| broadcast_questions(hub, view.record_question(stored)))
            .await
            .map_err(|source| ServiceError::PartialImport {
                imported: imported + 1,
                total,
                source: Box::new(source),
            })?;
    }

    info!(room_id = handle.room_id(), total, "questions imported");
    Ok(total)
}

/// Persist a single question and put it on screen.
///
/// Once the question is stored it is returned even if the pointer write
/// fails; that failure is only logged and the pointer stays where it was.
pub async fn add_question(handle: &RoomHandle, content: &str) -> Result<Question, ServiceError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ServiceError::InvalidInput(
            "question content must not be blank".into(),
        ));
    }

    let question = NewQuestionEntity {
        room_id: handle.room_id().to_string(),
        content: content.to_string(),
    };
    let stored = with_timeout(
        handle.request_timeout(),
        handle.repository().insert_question(&question),
    )
    .await?;
    let question_id = stored.id;

    handle
        .mutate(|view, hub| broadcast_questions(hub, view.record_question(stored)))
        .await?;
    if let Err(err) = show_question(handle, question_id).await {
        warn!(room_id = handle.room_id(), question_id, error = %err, "question added but not shown");
    }

    handle
        .read(|view| view.question(question_id).cloned())
        .await
        .ok_or_else(|| question_not_found(question_id))
}

/// Remove a question from the store and from the local list and selection.
pub async fn delete_question(handle: &RoomHandle, question_id: i64) -> Result<(), ServiceError> {
    let removed = with_timeout(
        handle.request_timeout(),
        handle
            .repository()
            .delete_question(handle.room_id(), question_id),
    )
    .await?;

    let changed = handle
        .mutate(|view, hub| {
            let applied = view.remove_question(question_id);
            let changed = applied.is_change();
            broadcast_questions(hub, applied);
            changed
        })
        .await?;

    if removed.is_empty() && !changed {
        return Err(question_not_found(question_id));
    }
    Ok(())
}

async fn roll_back(handle: &RoomHandle, plan: &Plan) {
    let outcome = handle
        .mutate(|view, hub| {
            let rollback = view.abort_pointer(plan.id)?;
            if let Rollback::Restore(previous) = &rollback {
                broadcast_current_question(hub, previous.clone());
            }
            Ok::<_, AbortError>(rollback)
        })
        .await;

    match outcome {
        Ok(Ok(Rollback::Restore(_))) => debug!(plan_id = %plan.id, "pointer restored"),
        Ok(Ok(Rollback::Superseded { expected, actual })) => {
            debug!(plan_id = %plan.id, expected, actual, "pointer changed remotely; keeping feed value")
        }
        Ok(Err(err)) => warn!(plan_id = %plan.id, error = %err, "failed to abort pointer move"),
        Err(_) => debug!(plan_id = %plan.id, "handle closed before rollback"),
    }
}

fn question_not_found(question_id: i64) -> ServiceError {
    ServiceError::NotFound(format!("question {question_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use futures::future::BoxFuture;
    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::{Value, json};
    use tokio::sync::{
        Notify,
        broadcast::{self, error::TryRecvError},
    };

    use crate::{
        config::AppConfig,
        dao::{
            models::{Filter, Table},
            room_store::{MemoryStore, RoomStore, Subscription, SubscriptionId},
            storage::{StorageError, StorageResult},
        },
        dto::{events::RoomChange, room::RoomSnapshot},
        services::sync_service::open_room,
        state::AppState,
    };

    async fn open_with(store: Arc<dyn RoomStore>) -> RoomHandle {
        let state = AppState::with_store(AppConfig::default(), store).await;
        open_room(&state, "r1").await.unwrap()
    }

    async fn seed_questions(store: &MemoryStore, contents: &[&str]) {
        let rows = contents
            .iter()
            .map(|content| json!({"room_id": "r1", "content": content}))
            .collect();
        store.insert(Table::Questions, rows).await.unwrap();
    }

    async fn seeded(contents: &[&str]) -> (MemoryStore, RoomHandle) {
        let store = MemoryStore::new();
        seed_questions(&store, contents).await;
        let handle = open_with(Arc::new(store.clone())).await;
        (store, handle)
    }

    async fn flaky(contents: &[&str]) -> (FlakyStore, RoomHandle) {
        let store = FlakyStore::new(usize::MAX);
        seed_questions(&store.inner, contents).await;
        let handle = open_with(Arc::new(store.clone())).await;
        (store, handle)
    }

    /// Start `show_question` with its upsert held, close the handle while it
    /// is in flight, then let the upsert finish.
    async fn show_across_close(
        refuse: bool,
    ) -> (Result<String, ServiceError>, RoomSnapshot, RoomSnapshot, broadcast::Receiver<RoomChange>) {
        let (store, handle) = flaky(&["A", "B"]).await;
        let a = id_of(&handle, "A").await;
        let mut rx = handle.subscribe();
        store.hold_upserts.store(true, Ordering::SeqCst);
        store.refuse_upserts.store(refuse, Ordering::SeqCst);

        let in_flight = tokio::spawn({
            let handle = handle.clone();
            async move { show_question(&handle, a).await }
        });
        store.upsert_entered.notified().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            RoomChange::CurrentQuestion {
                content: Some("A".into())
            }
        );

        handle.close().await;
        let at_close = handle.snapshot().await;
        store.upsert_release.notify_one();
        let result = in_flight.await.unwrap();
        settle().await;

        (result, at_close, handle.snapshot().await, rx)
    }

    async fn id_of(handle: &RoomHandle, content: &str) -> i64 {
        handle
            .read(|view| {
                view.questions()
                    .iter()
                    .find(|question| question.content == content)
                    .map(|question| question.id)
            })
            .await
            .unwrap()
    }

    /// Let feed tasks drain the echoes of writes made so far.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn pointer(handle: &RoomHandle) -> Option<String> {
        handle
            .read(|view| view.current_content().map(str::to_owned))
            .await
    }

    #[tokio::test]
    async fn next_advances_and_wraps() {
        let (store, handle) = seeded(&["A", "B", "C"]).await;

        let b = id_of(&handle, "B").await;
        show_question(&handle, b).await.unwrap();
        settle().await;
        assert_eq!(
            next_question(&handle).await.unwrap(),
            NavOutcome::Shown("C".into())
        );
        settle().await;
        assert_eq!(
            next_question(&handle).await.unwrap(),
            NavOutcome::Shown("A".into())
        );

        let rows = store.rows(Table::CurrentQuestion);
        assert_eq!(rows, vec![json!({"room_id": "r1", "content": "A"})]);
        handle.close().await;
    }

    #[tokio::test]
    async fn next_with_everything_hidden_leaves_pointer_alone() {
        let (store, handle) = seeded(&["A", "B"]).await;
        for content in ["A", "B"] {
            let id = id_of(&handle, content).await;
            assert!(!toggle_visibility(&handle, id).await.unwrap());
        }

        assert_eq!(next_question(&handle).await.unwrap(), NavOutcome::NoAdvance);
        assert_eq!(pointer(&handle).await, None);
        assert!(store.rows(Table::CurrentQuestion).is_empty());
        handle.close().await;
    }

    #[tokio::test]
    async fn next_on_empty_room_does_not_advance() {
        let (_store, handle) = seeded(&[]).await;
        assert_eq!(next_question(&handle).await.unwrap(), NavOutcome::NoAdvance);
        handle.close().await;
    }

    #[tokio::test]
    async fn failed_pointer_write_is_rolled_back() {
        let (store, handle) = seeded(&["A", "B"]).await;
        let a = id_of(&handle, "A").await;
        let b = id_of(&handle, "B").await;
        show_question(&handle, a).await.unwrap();
        settle().await;

        store.set_offline(true);
        let err = show_question(&handle, b).await.unwrap_err();

        assert!(matches!(err, ServiceError::Unavailable(_)));
        assert_eq!(pointer(&handle).await.as_deref(), Some("A"));
        assert!(handle.read(|view| view.pointer().pending().is_none()).await);
        handle.close().await;
    }

    #[tokio::test]
    async fn refused_write_finishing_after_close_changes_nothing() {
        let (result, at_close, after, mut rx) = show_across_close(true).await;

        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
        assert_eq!(at_close.current_question.as_deref(), Some("A"));
        assert_eq!(after, at_close);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn acknowledged_write_finishing_after_close_changes_nothing() {
        let (result, at_close, after, mut rx) = show_across_close(false).await;

        assert_eq!(result.unwrap(), "A");
        assert_eq!(after, at_close);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn concurrent_next_calls_advance_one_step_each() {
        let (_store, handle) = seeded(&["A", "B", "C"]).await;

        let first = tokio::spawn({
            let handle = handle.clone();
            async move { next_question(&handle).await }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            async move { next_question(&handle).await }
        });

        let mut shown = vec![first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        shown.sort_by_key(|outcome| format!("{outcome:?}"));
        assert_eq!(
            shown,
            vec![NavOutcome::Shown("A".into()), NavOutcome::Shown("B".into())]
        );
        settle().await;
        assert_eq!(pointer(&handle).await.as_deref(), Some("B"));
        handle.close().await;
    }

    #[tokio::test]
    async fn added_question_is_returned_when_pointer_write_fails() {
        let (store, handle) = flaky(&["A"]).await;
        store.refuse_upserts.store(true, Ordering::SeqCst);

        let question = add_question(&handle, "Fresh").await.unwrap();

        assert_eq!(question.content, "Fresh");
        assert_eq!(store.inner.rows(Table::Questions).len(), 2);
        assert!(handle.read(|view| view.question(question.id).is_some()).await);
        assert_eq!(pointer(&handle).await, None);
        handle.close().await;
    }

    #[tokio::test]
    async fn import_splits_trims_and_keeps_order() {
        let (_store, handle) = seeded(&[]).await;

        let imported = import_questions(&handle, "Q1;Q2; ;Q3", None).await.unwrap();

        assert_eq!(imported, 3);
        let snapshot = handle.snapshot().await;
        let contents: Vec<&str> = snapshot
            .questions
            .iter()
            .map(|question| question.content.as_str())
            .collect();
        assert_eq!(contents, vec!["Q1", "Q2", "Q3"]);
        assert!(snapshot.questions.iter().all(|question| question.show));
        assert!(snapshot.selected.is_empty());
        handle.close().await;
    }

    #[tokio::test]
    async fn import_failure_reports_progress_and_keeps_rows() {
        let store = FlakyStore::new(2);
        let handle = open_with(Arc::new(store.clone())).await;

        let err = import_questions(&handle, "a|b|c|d", Some("|"))
            .await
            .unwrap_err();

        match err {
            ServiceError::PartialImport {
                imported, total, ..
            } => {
                assert_eq!(imported, 2);
                assert_eq!(total, 4);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(handle.snapshot().await.questions.len(), 2);
        assert_eq!(store.inner.rows(Table::Questions).len(), 2);
        handle.close().await;
    }

    #[tokio::test]
    async fn add_question_persists_and_shows_it() {
        let (store, handle) = seeded(&["A"]).await;

        let question = add_question(&handle, "  New one ").await.unwrap();

        assert_eq!(question.content, "New one");
        assert!(question.show);
        assert_eq!(pointer(&handle).await.as_deref(), Some("New one"));
        assert_eq!(store.rows(Table::Questions).len(), 2);
        assert!(matches!(
            add_question(&handle, "   ").await,
            Err(ServiceError::InvalidInput(_))
        ));
        handle.close().await;
    }

    #[tokio::test]
    async fn delete_question_drops_row_and_selection() {
        let (store, handle) = seeded(&["A", "B"]).await;
        let a = id_of(&handle, "A").await;
        assert!(toggle_selection(&handle, a).await.unwrap());

        delete_question(&handle, a).await.unwrap();

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.questions.len(), 1);
        assert!(snapshot.selected.is_empty());
        assert_eq!(store.rows(Table::Questions).len(), 1);
        assert!(matches!(
            delete_question(&handle, a).await,
            Err(ServiceError::NotFound(_))
        ));
        handle.close().await;
    }

    #[tokio::test]
    async fn toggles_on_unknown_ids_are_not_found() {
        let (_store, handle) = seeded(&["A"]).await;
        assert!(matches!(
            toggle_visibility(&handle, 999).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            toggle_selection(&handle, 999).await,
            Err(ServiceError::NotFound(_))
        ));
        handle.close().await;
    }

    #[tokio::test]
    async fn shuffle_keeps_every_question_and_the_pointer() {
        let (_store, handle) = seeded(&["A", "B", "C", "D", "E"]).await;
        let c = id_of(&handle, "C").await;
        show_question(&handle, c).await.unwrap();

        shuffle_questions_with(&handle, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();

        let snapshot = handle.snapshot().await;
        let mut contents: Vec<String> = snapshot
            .questions
            .iter()
            .map(|question| question.content.clone())
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["A", "B", "C", "D", "E"]);
        assert_eq!(snapshot.current_question.as_deref(), Some("C"));
        handle.close().await;
    }

    /// Memory store with scripted failures: inserts fail after a quota, and
    /// pointer upserts can be refused or held until released.
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        remaining: Arc<AtomicUsize>,
        refuse_upserts: Arc<AtomicBool>,
        hold_upserts: Arc<AtomicBool>,
        upsert_entered: Arc<Notify>,
        upsert_release: Arc<Notify>,
    }

    impl FlakyStore {
        fn new(successes: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                remaining: Arc::new(AtomicUsize::new(successes)),
                refuse_upserts: Arc::new(AtomicBool::new(false)),
                hold_upserts: Arc::new(AtomicBool::new(false)),
                upsert_entered: Arc::new(Notify::new()),
                upsert_release: Arc::new(Notify::new()),
            }
        }
    }

    impl RoomStore for FlakyStore {
        fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
            self.inner.select(table, filter)
        }

        fn insert(&self, table: Table, rows: Vec<Value>) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
            let allowed = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if allowed {
                self.inner.insert(table, rows)
            } else {
                Box::pin(async move { Err(StorageError::rejected(table, "quota exceeded")) })
            }
        }

        fn update(
            &self,
            table: Table,
            filter: Filter,
            patch: Value,
        ) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
            self.inner.update(table, filter, patch)
        }

        fn upsert(
            &self,
            table: Table,
            row: Value,
            conflict_key: &'static str,
        ) -> BoxFuture<'static, StorageResult<Value>> {
            let inner = self.inner.clone();
            let refuse = self.refuse_upserts.load(Ordering::SeqCst);
            let hold = self.hold_upserts.load(Ordering::SeqCst);
            let entered = self.upsert_entered.clone();
            let release = self.upsert_release.clone();
            Box::pin(async move {
                if hold {
                    entered.notify_one();
                    release.notified().await;
                }
                if refuse {
                    return Err(StorageError::rejected(table, "pointer write refused"));
                }
                inner.upsert(table, row, conflict_key).await
            })
        }

        fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
            self.inner.delete(table, filter)
        }

        fn subscribe(
            &self,
            table: Table,
            filter: Filter,
        ) -> BoxFuture<'static, StorageResult<Subscription>> {
            self.inner.subscribe(table, filter)
        }

        fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.unsubscribe(id)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
    }
}
