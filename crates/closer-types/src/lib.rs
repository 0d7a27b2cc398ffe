pub mod api;
pub mod envelope;
pub mod events;
pub mod models;
