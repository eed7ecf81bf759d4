use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a planned pointer move.
pub type PlanId = Uuid;

/// Errors that can occur when planning a pointer move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A move is already pending and must be applied or aborted.
    #[error("a pointer move is already pending")]
    AlreadyPending,
}

/// Errors that can occur when confirming a planned move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// No move is currently pending.
    #[error("no pointer move is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("plan {got} does not match pending plan {expected}")]
    IdMismatch { expected: PlanId, got: PlanId },
}

/// Errors that can occur when aborting a planned move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// No move is currently pending.
    #[error("no pointer move is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("plan {got} does not match pending plan {expected}")]
    IdMismatch { expected: PlanId, got: PlanId },
}

/// An optimistic pointer move applied locally but not yet acknowledged by the store.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Identifier used to confirm or abort the move.
    pub id: PlanId,
    /// Pointer content before the optimistic write.
    pub previous: Option<String>,
    /// Content written optimistically.
    pub target: String,
    /// Version right after the optimistic write.
    pub version: usize,
    /// When the optimistic write happened.
    pub pending_since: Instant,
}

/// What to do with the local pointer once a planned move is aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Nothing touched the pointer since the plan: restore the previous content.
    Restore(Option<String>),
    /// The feed moved the pointer since the plan; keep the newer value.
    Superseded { expected: usize, actual: usize },
}

/// Bookkeeping for optimistic writes to the current question pointer.
///
/// Every local or remote change to the pointer bumps the version, so an abort
/// can tell whether its optimistic value is still the one on display.
#[derive(Debug, Clone, Default)]
pub struct PointerTransitions {
    version: usize,
    pending: Option<Plan>,
}

impl PointerTransitions {
    /// Fresh bookkeeping with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pointer changes seen so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Move awaiting the store, if any.
    pub fn pending(&self) -> Option<&Plan> {
        self.pending.as_ref()
    }

    /// Record a change delivered by the feed.
    pub fn observe_remote(&mut self) {
        self.version += 1;
    }

    /// Register an optimistic move from `previous` to `target`.
    pub fn plan(&mut self, previous: Option<String>, target: String) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        self.version += 1;
        let plan = Plan {
            id: Uuid::new_v4(),
            previous,
            target,
            version: self.version,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// The store acknowledged the move.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<(), ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        Ok(())
    }

    /// The store refused the move (or never answered).
    pub fn abort(&mut self, plan_id: PlanId) -> Result<Rollback, AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        let rollback = if plan.version == self.version {
            self.version += 1;
            Rollback::Restore(plan.previous.clone())
        } else {
            Rollback::Superseded {
                expected: plan.version,
                actual: self.version,
            }
        };
        self.pending = None;

        Ok(rollback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_without_interference_restores_previous() {
        let mut pointer = PointerTransitions::new();
        let plan = pointer.plan(Some("A".into()), "B".into()).unwrap();

        assert_eq!(
            pointer.abort(plan.id).unwrap(),
            Rollback::Restore(Some("A".into()))
        );
        assert!(pointer.pending().is_none());
    }

    #[test]
    fn abort_after_remote_change_keeps_feed_value() {
        let mut pointer = PointerTransitions::new();
        let plan = pointer.plan(None, "B".into()).unwrap();
        pointer.observe_remote();

        assert!(matches!(
            pointer.abort(plan.id).unwrap(),
            Rollback::Superseded { .. }
        ));
    }

    #[test]
    fn only_one_move_may_be_pending() {
        let mut pointer = PointerTransitions::new();
        let plan = pointer.plan(None, "A".into()).unwrap();
        assert_eq!(
            pointer.plan(Some("A".into()), "B".into()).unwrap_err(),
            PlanError::AlreadyPending
        );

        pointer.apply(plan.id).unwrap();
        assert!(pointer.plan(Some("A".into()), "B".into()).is_ok());
    }

    #[test]
    fn mismatched_ids_are_refused() {
        let mut pointer = PointerTransitions::new();
        let plan = pointer.plan(None, "A".into()).unwrap();
        let other = Uuid::new_v4();

        assert!(matches!(
            pointer.apply(other),
            Err(ApplyError::IdMismatch { .. })
        ));
        assert!(matches!(
            pointer.abort(other),
            Err(AbortError::IdMismatch { .. })
        ));
        assert_eq!(pointer.pending().map(|pending| pending.id), Some(plan.id));
    }

    #[test]
    fn apply_without_plan_fails() {
        let mut pointer = PointerTransitions::new();
        assert_eq!(
            pointer.apply(Uuid::new_v4()).unwrap_err(),
            ApplyError::NoPending
        );
    }
}
