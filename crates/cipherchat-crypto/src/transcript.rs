//! Canonical byte encoding for signed structures.
//!
//! A transcript is a domain separator followed by `(tag, len, bytes)` entries.
//! Every field is length-prefixed, so no two distinct field sets can produce
//! the same byte sequence, and the same logical data always encodes the same
//! way on the signing and the verifying side.

use bytes::{BufMut, BytesMut};

use crate::engine::CryptoError;

/// Field tags used by the signed structures in this crate.
pub mod tags {
    pub const DOMAIN: u32 = 0;
    pub const CIPHERTEXT: u32 = 1;
    pub const IV: u32 = 2;
    pub const WRAPPED_KEY: u32 = 3;
    pub const TIMESTAMP: u32 = 4;
    pub const SENDER: u32 = 5;
    pub const RECIPIENT: u32 = 6;
    pub const PUBLIC_KEY: u32 = 7;
}

/// Builder for the bytes a signature covers.
///
/// Appends chain without failing. A field whose length does not fit the u32
/// prefix is recorded and reported by [`Transcript::finish`].
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    buf: BytesMut,
    oversized: Option<u32>,
}

impl Transcript {
    /// Create a new transcript with the given domain separator.
    pub fn new(domain: &'static str) -> Self {
        let mut t = Self {
            buf: BytesMut::with_capacity(256),
            oversized: None,
        };
        t.append_str(tags::DOMAIN, domain);
        t
    }

    /// Append raw bytes with a tag.
    pub fn append_bytes(&mut self, tag: u32, data: &[u8]) -> &mut Self {
        if self.put_header(tag, data.len()) {
            self.buf.extend_from_slice(data);
        }
        self
    }

    /// Append a u64 value with a tag.
    pub fn append_u64(&mut self, tag: u32, v: u64) -> &mut Self {
        self.put_header(tag, 8);
        self.buf.put_u64(v);
        self
    }

    /// Append a string with a tag (encoded as UTF-8 bytes).
    pub fn append_str(&mut self, tag: u32, s: &str) -> &mut Self {
        self.append_bytes(tag, s.as_bytes())
    }

    // tag (u32 be) + len (u32 be). False, and nothing written, if `len`
    // overflows the prefix.
    fn put_header(&mut self, tag: u32, len: usize) -> bool {
        let Ok(len) = u32::try_from(len) else {
            self.oversized.get_or_insert(tag);
            return false;
        };
        self.buf.put_u32(tag);
        self.buf.put_u32(len);
        true
    }

    /// The encoded bytes, or `FieldTooLong` naming the first field that
    /// could not be length-prefixed.
    pub fn finish(self) -> Result<Vec<u8>, CryptoError> {
        match self.oversized {
            Some(tag) => Err(CryptoError::FieldTooLong(tag)),
            None => Ok(self.buf.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_like(sender: &str, recipient: &str, timestamp: u64) -> Vec<u8> {
        let mut t = Transcript::new("cipherchat_test_v1");
        t.append_bytes(tags::CIPHERTEXT, b"ct")
            .append_bytes(tags::IV, &[7u8; 16])
            .append_u64(tags::TIMESTAMP, timestamp)
            .append_str(tags::SENDER, sender)
            .append_str(tags::RECIPIENT, recipient);
        t.finish().unwrap()
    }

    #[test]
    fn test_same_fields_same_bytes() {
        assert_eq!(
            envelope_like("alice", "bob", 1_760_000_000),
            envelope_like("alice", "bob", 1_760_000_000)
        );
        assert_ne!(
            envelope_like("alice", "bob", 1_760_000_000),
            envelope_like("alice", "bob", 1_760_000_001)
        );
    }

    #[test]
    fn test_domain_separates() {
        let mut a = Transcript::new("cipherchat_envelope_sig_v1");
        a.append_str(tags::SENDER, "alice");
        let mut b = Transcript::new("cipherchat_key_intro_v1");
        b.append_str(tags::SENDER, "alice");
        assert_ne!(a.finish().unwrap(), b.finish().unwrap());
    }

    #[test]
    fn test_length_prefix_prevents_boundary_shift() {
        // "ab" + "c" must not encode like "a" + "bc"
        assert_ne!(envelope_like("ab", "c", 0), envelope_like("a", "bc", 0));
    }

    #[test]
    fn test_swapping_sender_and_recipient_changes_bytes() {
        assert_ne!(envelope_like("alice", "bob", 0), envelope_like("bob", "alice", 0));
    }

    #[test]
    fn test_entry_layout() {
        let mut t = Transcript::new("d");
        t.append_u64(tags::TIMESTAMP, 0x0102);

        let expected: Vec<u8> = [
            &0u32.to_be_bytes()[..],
            &1u32.to_be_bytes()[..],
            b"d",
            &4u32.to_be_bytes()[..],
            &8u32.to_be_bytes()[..],
            &0x0102u64.to_be_bytes()[..],
        ]
        .concat();
        assert_eq!(t.len(), expected.len());
        assert!(!t.is_empty());
        assert_eq!(t.finish().unwrap(), expected);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_length_past_u32_is_reported() {
        let mut t = Transcript::new("d");
        assert!(t.put_header(tags::CIPHERTEXT, u32::MAX as usize));
        let before = t.len();
        assert!(!t.put_header(tags::WRAPPED_KEY, u32::MAX as usize + 1));
        assert_eq!(t.len(), before);
        // later fields still append, but the transcript cannot be finished
        t.append_str(tags::SENDER, "alice");
        assert_eq!(
            t.finish().unwrap_err(),
            CryptoError::FieldTooLong(tags::WRAPPED_KEY)
        );
    }
}
