//! Utility functions for cryptographic operations.
//!
//! Provides constant-time comparison so that checks against secret or
//! attacker-chosen values (fingerprints, digests) do not leak through timing
//! which byte differed.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices in constant time.
///
/// Returns `true` if the slices are equal. Slices of different length compare
/// unequal without inspecting their contents.
///
/// # Example
///
/// ```rust
/// use cipherchat_crypto::utils::constant_time_compare;
///
/// let fp1 = [0u8; 32];
/// let fp2 = [0u8; 32];
/// assert!(constant_time_compare(&fp1, &fp2));
///
/// let fp3 = [1u8; 32];
/// assert!(!constant_time_compare(&fp1, &fp3));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

/// Decode a hex fingerprint as typed by a user (case-insensitive, `:` and
/// whitespace separators allowed) into 32 bytes.
pub fn parse_fingerprint(text: &str) -> Option<[u8; 32]> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(cleaned.to_ascii_lowercase()).ok()?;
    bytes.try_into().ok()
}

/// Serde adapter for binary fields carried as standard padded base64 strings.
pub mod serde_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
