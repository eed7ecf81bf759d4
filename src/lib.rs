//! Replicated quiz room state: reconciled change feeds, optimistic pointer
//! moves and the room, question and like services built on top of them.

/// Environment driven settings.
pub mod config;
/// Storage access.
pub mod dao;
/// Payloads and notifications exchanged with callers.
pub mod dto;
/// Service error taxonomy.
pub mod error;
/// Operations on rooms, questions and likes.
pub mod services;
/// Shared application state and room replicas.
pub mod state;
