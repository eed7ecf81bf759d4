//! Validation of raw change notifications into typed feed events.

use serde_json::Value;
use thiserror::Error;

use crate::{dao::room_store::RawChange, state::reconciler::Record};

/// A validated change to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<R: Record> {
    /// A row was created.
    Insert(R),
    /// A row changed; carries the full new row.
    Update(R),
    /// A row was removed; only its key is known.
    Delete(R::Key),
}

/// Reasons a raw notification is refused before it reaches a reconciler.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Kind is not INSERT, UPDATE or DELETE.
    #[error("unknown change kind `{kind}`")]
    UnknownKind { kind: String },
    /// The row the kind needs is absent.
    #[error("{kind} notification carries no row")]
    MissingRecord { kind: &'static str },
    /// The row lacks its primary key column.
    #[error("row is missing key column `{column}`")]
    MissingKey { column: &'static str },
    /// The row does not deserialize into the record.
    #[error("row does not match the `{table}` shape")]
    Decode {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl<R: Record> FeedEvent<R> {
    /// Decode a raw notification, keyed on the table's primary key.
    pub fn decode(raw: RawChange) -> Result<Self, FeedError> {
        let column = R::TABLE.primary_key();
        match raw.kind.to_ascii_uppercase().as_str() {
            "INSERT" => {
                let row = require_row(raw.new, "INSERT", column)?;
                Ok(FeedEvent::Insert(decode_record::<R>(row)?))
            }
            "UPDATE" => {
                let row = require_row(raw.new, "UPDATE", column)?;
                Ok(FeedEvent::Update(decode_record::<R>(row)?))
            }
            "DELETE" => {
                let mut row = require_row(raw.old, "DELETE", column)?;
                let key = row
                    .get_mut(column)
                    .map(Value::take)
                    .ok_or(FeedError::MissingKey { column })?;
                serde_json::from_value(key)
                    .map(FeedEvent::Delete)
                    .map_err(|source| FeedError::Decode {
                        table: R::TABLE.name(),
                        source,
                    })
            }
            _ => Err(FeedError::UnknownKind { kind: raw.kind }),
        }
    }
}

fn require_row(
    row: Option<Value>,
    kind: &'static str,
    column: &'static str,
) -> Result<Value, FeedError> {
    let row = row.ok_or(FeedError::MissingRecord { kind })?;
    match row.get(column) {
        Some(value) if !value.is_null() => Ok(row),
        _ => Err(FeedError::MissingKey { column }),
    }
}

fn decode_record<R: Record>(row: Value) -> Result<R, FeedError> {
    serde_json::from_value::<R::Row>(row)
        .map(R::from_row)
        .map_err(|source| FeedError::Decode {
            table: R::TABLE.name(),
            source,
        })
}
