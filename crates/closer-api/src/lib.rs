pub mod auth;
pub mod groups;
pub mod keys;
pub mod messages;
pub mod middleware;
pub mod wire;

pub use auth::{AppState, AppStateInner};
