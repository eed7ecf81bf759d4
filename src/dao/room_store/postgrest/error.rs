//! Error types shared by the PostgREST storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`PostgrestError`] failures.
pub type PostgrestResult<T> = Result<T, PostgrestError>;

/// Failures that can occur while talking to PostgREST or its realtime socket.
#[derive(Debug, Error)]
pub enum PostgrestError {
    /// Building the HTTP client failed (invalid TLS setup, header values, etc).
    #[error("failed to build PostgREST client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The API key cannot be used as an HTTP header value.
    #[error("API key is not a valid header value")]
    InvalidApiKey,
    /// The schema name cannot be used as a profile header.
    #[error("schema `{schema}` is not a valid header value")]
    InvalidSchema { schema: String },
    /// A request could not be sent.
    #[error("failed to send PostgREST request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// PostgREST answered with a non-success status.
    #[error("unexpected PostgREST response status {status} for `{resource}`: {body}")]
    RequestStatus {
        resource: &'static str,
        status: StatusCode,
        body: String,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode PostgREST response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// Opening the realtime websocket failed.
    #[error("failed to connect to realtime endpoint")]
    RealtimeConnect {
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// The realtime server refused or never acknowledged the channel join.
    #[error("realtime join for `{topic}` failed: {reason}")]
    RealtimeJoin { topic: String, reason: String },
}

impl From<PostgrestError> for StorageError {
    fn from(err: PostgrestError) -> Self {
        match err {
            PostgrestError::RequestStatus {
                resource,
                status,
                ref body,
            } if status.is_client_error() => StorageError::Rejected {
                table: resource,
                message: format!("{status} {body}"),
            },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
