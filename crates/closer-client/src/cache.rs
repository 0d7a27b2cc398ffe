use std::collections::HashMap;

use uuid::Uuid;

use closer_crypto::PublicKey;

/// Session-scoped memo of other users' public keys. Only successful lookups
/// are cached, so a user who enrolls mid-session is picked up on the next
/// miss.
#[derive(Default)]
pub struct PublicKeyCache {
    entries: HashMap<Uuid, PublicKey>,
}

impl PublicKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: Uuid) -> Option<&PublicKey> {
        self.entries.get(&user_id)
    }

    pub fn insert(&mut self, user_id: Uuid, key: PublicKey) {
        self.entries.insert(user_id, key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
