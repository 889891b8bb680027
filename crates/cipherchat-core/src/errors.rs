//! Error types for CipherChat Core.
//!
//! Every fallible operation in this crate returns [`CoreError`]. Messages never
//! carry key bytes or plaintext; storage errors name only the operation and
//! the handle involved.

use cipherchat_crypto::CryptoError;
use thiserror::Error;

/// Shown to end users for every authentication or decryption failure.
pub const UNVERIFIABLE_NOTICE: &str = "message could not be verified or decrypted";

// ============================================================================
// Unified Core Error
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("key generation failed")]
    KeyGenerationFailed,

    #[error("identity already exists: {0}")]
    IdentityExists(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid key format")]
    InvalidKeyFormat,

    #[error("no public key for recipient: {0}")]
    RecipientKeyMissing(String),

    #[error("no private key for sender: {0}")]
    SenderKeyMissing(String),

    #[error("unknown sender: {0}")]
    UnknownSender(String),

    #[error("envelope addressed to {actual}, not {expected}")]
    WrongRecipient { expected: String, actual: String },

    /// Shares its message with `DecryptionFailed`.
    #[error("message could not be verified or decrypted")]
    SignatureInvalid,

    #[error("message timestamp {timestamp} outside freshness window (now {now})")]
    StaleMessage { timestamp: u64, now: u64 },

    #[error("message could not be verified or decrypted")]
    DecryptionFailed,

    // -------------------------------------------------------------------------
    // Input validation
    // -------------------------------------------------------------------------
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("duplicate envelope")]
    Replayed,

    // -------------------------------------------------------------------------
    // Infrastructure
    // -------------------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Encryption, signing or randomness failure on the sending side.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyGenerationFailed => CoreError::KeyGenerationFailed,
            CryptoError::InvalidKeyFormat => CoreError::InvalidKeyFormat,
            CryptoError::DecryptionFailed => CoreError::DecryptionFailed,
            CryptoError::SignatureInvalid => CoreError::SignatureInvalid,
            CryptoError::MalformedEnvelope(detail) => CoreError::MalformedEnvelope(detail),
            CryptoError::UnsupportedAlgorithm(tag) => CoreError::UnsupportedAlgorithm(tag),
            other @ (CryptoError::EncryptionFailed
            | CryptoError::SigningFailed
            | CryptoError::RandomnessUnavailable
            | CryptoError::FieldTooLong(_)) => CoreError::Crypto(other),
        }
    }
}

impl CoreError {
    pub(crate) fn storage(op: &str, handle: &str, err: impl std::fmt::Display) -> Self {
        CoreError::Storage(format!("{op} {handle}: {err}"))
    }

    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::KeyGenerationFailed => "key_generation_failed",
            CoreError::IdentityExists(_) => "identity_exists",
            CoreError::KeyNotFound(_) => "key_not_found",
            CoreError::InvalidKeyFormat => "invalid_key_format",
            CoreError::RecipientKeyMissing(_) => "recipient_key_missing",
            CoreError::SenderKeyMissing(_) => "sender_key_missing",
            CoreError::UnknownSender(_) => "unknown_sender",
            CoreError::WrongRecipient { .. } => "wrong_recipient",
            CoreError::SignatureInvalid => "signature_invalid",
            CoreError::StaleMessage { .. } => "stale_message",
            CoreError::DecryptionFailed => "decryption_failed",
            CoreError::InvalidHandle(_) => "invalid_handle",
            CoreError::MessageTooLarge { .. } => "message_too_large",
            CoreError::MalformedEnvelope(_) => "malformed_envelope",
            CoreError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            CoreError::FingerprintMismatch { .. } => "fingerprint_mismatch",
            CoreError::Replayed => "replayed",
            CoreError::Storage(_) => "storage",
            CoreError::Config(_) => "config",
            CoreError::Crypto(_) => "crypto",
        }
    }

    /// Wire/user-safe text. Never exposes handles, timestamps or internal
    /// detail, and gives the same notice for every authentication or
    /// decryption failure on the receiving side.
    pub fn public_notice(&self) -> &'static str {
        match self {
            CoreError::SignatureInvalid
            | CoreError::DecryptionFailed
            | CoreError::UnknownSender(_)
            | CoreError::StaleMessage { .. }
            | CoreError::Replayed
            | CoreError::MalformedEnvelope(_)
            | CoreError::UnsupportedAlgorithm(_) => UNVERIFIABLE_NOTICE,
            CoreError::WrongRecipient { .. } => "message is addressed to someone else",
            CoreError::IdentityExists(_) => "identity already exists",
            CoreError::KeyNotFound(_)
            | CoreError::RecipientKeyMissing(_)
            | CoreError::SenderKeyMissing(_) => "required key is not available",
            CoreError::InvalidKeyFormat | CoreError::FingerprintMismatch { .. } => {
                "public key was rejected"
            }
            CoreError::InvalidHandle(_) => "invalid user name",
            CoreError::MessageTooLarge { .. } => "message is too large",
            CoreError::KeyGenerationFailed
            | CoreError::Storage(_)
            | CoreError::Config(_)
            | CoreError::Crypto(_) => "internal error",
        }
    }

    /// True for the failures an adversary can trigger with crafted input.
    pub fn is_authentication_failure(&self) -> bool {
        self.public_notice() == UNVERIFIABLE_NOTICE
    }
}
