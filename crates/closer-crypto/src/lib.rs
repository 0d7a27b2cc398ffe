//! Closer Crypto Library
//!
//! End-to-end encryption for chat message bodies:
//! - Static X25519 account keypairs with durable local storage ([`keys`]).
//! - Hybrid encryption: one AES-256-GCM ciphertext per message, the
//!   one-time message key sealed separately for each reader ([`wrap`]).
//! - Direct messages wrap the key twice (recipient + sender self-copy,
//!   [`direct`]); group messages fan the key out to every member whose
//!   public key is discoverable at send time ([`group`]).
//! - Hash-based integrity signatures and transport encoding ([`codec`]).
//!
//! The server never needs this crate's ciphers; it relays envelopes as
//! opaque text.

pub mod codec;
pub mod direct;
pub mod error;
pub mod group;
pub mod keys;
pub mod wrap;

pub use error::CryptoError;
pub use keys::{KeyPair, KeyStore, PublicKey};
