//! Client-side delivery coordination: optimistic timelines, best-effort
//! encryption, and reconciliation against the server's confirmed records.

pub mod cache;
pub mod collaborators;
pub mod coordinator;
pub mod rest;
pub mod timeline;

pub use cache::PublicKeyCache;
pub use collaborators::{AccountDirectory, FanoutLink, MessageStore};
pub use coordinator::{DeliveryCoordinator, EventOutcome, Selection};
pub use timeline::ViewMessage;
