//! Shared types for CipherChat Core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cipherchat_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// A validated identity handle: 3 to 32 characters of `[A-Za-z0-9_-]`,
/// excluding the [`Handle::RESERVED`] names in any letter case.
///
/// The character set keeps handles safe to use as path components.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    pub const MIN_LEN: usize = 3;
    pub const MAX_LEN: usize = 32;
    pub const RESERVED: [&'static str; 7] =
        ["admin", "root", "system", "config", "test", "null", "undefined"];

    pub fn new(handle: impl Into<String>) -> Result<Self, CoreError> {
        let handle = handle.into();
        let len_ok = (Self::MIN_LEN..=Self::MAX_LEN).contains(&handle.len());
        let chars_ok = handle
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        let reserved = Self::RESERVED
            .iter()
            .any(|name| handle.eq_ignore_ascii_case(name));
        if len_ok && chars_ok && !reserved {
            Ok(Self(handle))
        } else {
            Err(CoreError::InvalidHandle(handle))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What `generate` does when the handle already has key material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Fail with `IdentityExists`.
    #[default]
    Refuse,
    /// Overwrite. Envelopes sealed to the old public key become undecryptable.
    Replace,
}

/// Metadata stored next to an identity's key pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub handle: Handle,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
    pub modulus_bits: usize,
    pub fingerprint: String,
}

/// An imported, trust-unverified copy of another identity's public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub handle: Handle,
    pub public_key: PublicKey,
    pub imported_at: DateTime<Utc>,
}

impl PublicKeyRecord {
    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint_hex()
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
