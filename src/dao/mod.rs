/// Row shapes, table names and filters.
pub mod models;
/// Typed access to the room store tables.
pub mod repository;
/// Store abstraction and its implementations.
pub mod room_store;
/// Storage error taxonomy.
pub mod storage;
