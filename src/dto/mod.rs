/// Notifications published by room handles.
pub mod events;
/// Room requests, listings and snapshots.
pub mod room;
pub mod validation;
