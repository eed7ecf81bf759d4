mod config;
mod error;
mod realtime;
mod store;

pub use config::PostgrestConfig;
pub use error::{PostgrestError, PostgrestResult};
pub use store::PostgrestStore;
