//! Account keypairs and the local key store.
//!
//! Each account holds one static X25519 keypair, generated at first
//! successful enrollment and never rotated. The public half is published
//! through the account collaborator; the private half lives in a fixed
//! file under the client's data directory (and, as a recovery fallback,
//! escrowed server-side by the coordinator — the KeyStore itself never
//! transmits it).

use std::fs;
use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Fixed namespace for the resident private key; at most one per account
/// context.
const STORAGE_FILE: &str = "closer_private_key";

/// 32-byte X25519 public key, base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn to_b64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_b64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(encoded)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

/// Account encryption keypair. Drop clears the secret half.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    public: PublicKey,
    secret_bytes: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(X25519Public::from(&secret).to_bytes());
        Self {
            public,
            secret_bytes: secret.to_bytes(),
        }
    }

    /// Rebuild a keypair from its exported secret half.
    pub fn from_secret_b64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(encoded.trim())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("private key must be 32 bytes".into()))?;
        Ok(Self::from_secret(StaticSecret::from(bytes)))
    }

    /// Export the secret half for persistence or escrow.
    pub fn secret_b64(&self) -> String {
        BASE64.encode(self.secret_bytes)
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_b64(&self) -> String {
        self.public.to_b64()
    }

    pub(crate) fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret_bytes)
    }
}

/// Durable local storage for the account's private key.
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(STORAGE_FILE),
        }
    }

    /// Persist the private half, replacing any resident key wholesale.
    pub fn persist(&self, keys: &KeyPair) -> Result<(), CryptoError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, keys.secret_b64())?;
        Ok(())
    }

    /// Load the resident keypair, if any.
    pub fn load(&self) -> Result<Option<KeyPair>, CryptoError> {
        match fs::read_to_string(&self.path) {
            Ok(encoded) => Ok(Some(KeyPair::from_secret_b64(&encoded)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Explicit key clear. Not called on logout, so a returning login can
    /// still decrypt history.
    pub fn clear(&self) -> Result<(), CryptoError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has_keys(&self) -> bool {
        self.path.exists()
    }
}
