use serde::Serialize;

use crate::state::reconciler::Applied;

/// Notification emitted by a room handle whenever its observable state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomChange {
    /// Every collection was loaded from scratch.
    Seeded { players: usize, questions: usize },
    /// A player row changed.
    Players { change: Applied<String> },
    /// A question row changed.
    Questions { change: Applied<i64> },
    /// The pointer now shows `content` (`None` once removed).
    CurrentQuestion { content: Option<String> },
    /// The question list was permuted locally.
    QuestionsReordered,
    /// The question list was re-fetched, transient flags reset.
    QuestionsReloaded { questions: usize },
    /// A local-only flag (visibility or selection) flipped on a question.
    LocalAnnotation { question_id: i64 },
    /// A feed notification was refused; state is unchanged.
    Rejected {
        collection: &'static str,
        reason: String,
    },
    /// The feed for a collection ended while the handle was open.
    FeedLost { collection: &'static str },
}
