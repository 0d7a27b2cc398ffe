use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The OS random source failed. Fatal to enrollment; callers must not
    /// silently fall back to unencrypted mode for a new account.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Recoverable: the caller's policy is to send unencrypted instead of
    /// blocking the message.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication tag mismatch or corrupt envelope. Recoverable: the
    /// caller renders a placeholder, never surfaces the error to the UI.
    #[error("decryption failed (tag mismatch or corrupt envelope)")]
    Decryption,

    /// The envelope carries no wrapped key addressed to this viewer.
    #[error("no wrapped key for this viewer")]
    NoKeyForViewer,

    #[error("key store I/O error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}
