//! Pure navigation rules over a room's question list.

use serde::Serialize;

use crate::state::{reconciler::Reconciler, room::Question};

/// Result of asking for the next question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "content", rename_all = "snake_case")]
pub enum NavOutcome {
    /// The pointer now shows this text.
    Shown(String),
    /// No visible question to move to; the pointer was left alone.
    NoAdvance,
}

/// Id of the question `next` should land on.
///
/// Starts right after the first question whose text equals `current` (or at
/// the head when nothing matches) and scans forward, wrapping once, for the
/// first visible question.
pub fn next_target(questions: &Reconciler<Question>, current: Option<&str>) -> Option<i64> {
    let len = questions.len();
    if len == 0 {
        return None;
    }

    let start = current
        .and_then(|content| questions.iter().position(|question| question.content == content))
        .map_or(0, |index| (index + 1) % len);

    (0..len)
        .filter_map(|offset| questions.get_index((start + offset) % len))
        .find(|question| question.show)
        .map(|question| question.id)
}

/// Split an imported blob into trimmed, non-empty question texts.
pub fn split_batch(raw: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        let text = raw.trim();
        return if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    raw.split(delimiter)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
