//! The portable message envelope.
//!
//! An [`Envelope`] is what travels between parties: hybrid ciphertext, the
//! wrapped session key, routing handles, a timestamp and the sender's
//! signature over a canonical encoding of all of those. It serializes to JSON
//! with base64 binary fields.
//!
//! Decryption is only reachable through [`Envelope::verify`], which returns a
//! [`VerifiedEnvelope`] on success. There is no way to decrypt an envelope
//! whose signature has not been checked.

use serde::{Deserialize, Serialize};

use crate::engine::{CryptoEngine, CryptoError};
use crate::keys::{KeyMaterial, PublicKey};
use crate::transcript::{tags, Transcript};

/// Identifies the primitive suite an envelope was produced with.
pub const ALGORITHM_TAG: &str = "cipherchat/v1:rsa2048-oaep-sha256+aes256-cbc+rsa-pss-sha256";

const ENVELOPE_SIG_DOMAIN: &str = "cipherchat_envelope_sig_v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
    /// Unix seconds, UTC.
    pub timestamp: u64,
    #[serde(with = "crate::utils::serde_base64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::utils::serde_base64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::utils::serde_base64")]
    pub wrapped_key: Vec<u8>,
    #[serde(with = "crate::utils::serde_base64")]
    pub signature: Vec<u8>,
    pub algorithm_tag: String,
}

/// Canonical bytes covered by an envelope signature. Used by both the
/// sealing and the verifying side.
pub fn envelope_signing_bytes(
    ciphertext: &[u8],
    iv: &[u8],
    wrapped_key: &[u8],
    timestamp: u64,
    sender: &str,
    recipient: &str,
) -> Result<Vec<u8>, CryptoError> {
    let mut t = Transcript::new(ENVELOPE_SIG_DOMAIN);
    t.append_bytes(tags::CIPHERTEXT, ciphertext)
        .append_bytes(tags::IV, iv)
        .append_bytes(tags::WRAPPED_KEY, wrapped_key)
        .append_u64(tags::TIMESTAMP, timestamp)
        .append_str(tags::SENDER, sender)
        .append_str(tags::RECIPIENT, recipient);
    t.finish()
}

impl Envelope {
    /// Encrypt `plaintext` to `recipient_key` and sign the result with
    /// `sender_keys`.
    pub fn seal(
        engine: &CryptoEngine,
        sender: &str,
        recipient: &str,
        plaintext: &[u8],
        recipient_key: &PublicKey,
        sender_keys: &KeyMaterial,
        timestamp: u64,
    ) -> Result<Self, CryptoError> {
        let sealed = engine.hybrid_encrypt(plaintext, recipient_key)?;
        let signing_bytes = envelope_signing_bytes(
            &sealed.ciphertext,
            &sealed.iv,
            &sealed.wrapped_key,
            timestamp,
            sender,
            recipient,
        )?;
        let signature = engine.sign(&signing_bytes, sender_keys)?;

        Ok(Self {
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
            timestamp,
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            wrapped_key: sealed.wrapped_key,
            signature,
            algorithm_tag: ALGORITHM_TAG.to_owned(),
        })
    }

    /// Re-derive the canonical bytes from this envelope's own fields.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        envelope_signing_bytes(
            &self.ciphertext,
            &self.iv,
            &self.wrapped_key,
            self.timestamp,
            &self.sender,
            &self.recipient,
        )
    }

    pub fn check_algorithm(&self) -> Result<(), CryptoError> {
        if self.algorithm_tag == ALGORITHM_TAG {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedAlgorithm(self.algorithm_tag.clone()))
        }
    }

    /// Check the algorithm tag and the sender's signature.
    pub fn verify<'a>(
        &'a self,
        engine: &CryptoEngine,
        sender_key: &PublicKey,
    ) -> Result<VerifiedEnvelope<'a>, CryptoError> {
        self.check_algorithm()?;
        // Fields too long to encode cannot have been signed.
        let signed = self
            .canonical_bytes()
            .map_err(|_| CryptoError::SignatureInvalid)?;
        if !engine.verify(&signed, &self.signature, sender_key) {
            return Err(CryptoError::SignatureInvalid);
        }
        Ok(VerifiedEnvelope {
            envelope: self,
            engine: *engine,
        })
    }

    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string_pretty(self).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(text).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }
}

/// An envelope whose signature has been checked against its claimed sender.
#[derive(Debug)]
pub struct VerifiedEnvelope<'a> {
    envelope: &'a Envelope,
    engine: CryptoEngine,
}

impl<'a> VerifiedEnvelope<'a> {
    pub fn sender(&self) -> &'a str {
        &self.envelope.sender
    }

    pub fn recipient(&self) -> &'a str {
        &self.envelope.recipient
    }

    pub fn timestamp(&self) -> u64 {
        self.envelope.timestamp
    }

    pub fn signature(&self) -> &'a [u8] {
        &self.envelope.signature
    }

    pub fn envelope(&self) -> &'a Envelope {
        self.envelope
    }

    pub fn decrypt(&self, recipient_keys: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
        self.engine.hybrid_decrypt(
            &self.envelope.ciphertext,
            &self.envelope.iv,
            &self.envelope.wrapped_key,
            recipient_keys,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    const T0: u64 = 1_760_000_000;

    fn sealed(plaintext: &[u8]) -> Envelope {
        Envelope::seal(
            &CryptoEngine::new(),
            "alice",
            "bob",
            plaintext,
            fixtures::bob().public_key(),
            fixtures::alice(),
            T0,
        )
        .unwrap()
    }

    #[test]
    fn test_seal_verify_decrypt() {
        let engine = CryptoEngine::new();
        let env = sealed(b"meet at 9");
        assert!(!env.signature.is_empty());
        assert_eq!(env.algorithm_tag, ALGORITHM_TAG);

        let verified = env.verify(&engine, fixtures::alice().public_key()).unwrap();
        assert_eq!(verified.sender(), "alice");
        assert_eq!(verified.recipient(), "bob");
        assert_eq!(verified.timestamp(), T0);
        assert_eq!(verified.decrypt(fixtures::bob()).unwrap(), b"meet at 9");
    }

    #[test]
    fn test_signature_binds_every_field() {
        let engine = CryptoEngine::new();
        let alice_pub = fixtures::alice().public_key();
        let env = sealed(b"payload");

        let mut mutations: Vec<Envelope> = Vec::new();
        for i in [0, env.ciphertext.len() - 1] {
            let mut e = env.clone();
            e.ciphertext[i] ^= 0x01;
            mutations.push(e);
        }
        let mut e = env.clone();
        e.iv[0] ^= 0x01;
        mutations.push(e);
        let mut e = env.clone();
        e.wrapped_key[5] ^= 0x01;
        mutations.push(e);
        let mut e = env.clone();
        e.timestamp ^= 1;
        mutations.push(e);
        let mut e = env.clone();
        e.sender = "alicf".into();
        mutations.push(e);
        let mut e = env.clone();
        e.recipient = "carol".into();
        mutations.push(e);

        for tampered in &mutations {
            assert_eq!(
                tampered.verify(&engine, alice_pub).unwrap_err(),
                CryptoError::SignatureInvalid
            );
        }
    }

    #[test]
    fn test_verify_with_wrong_sender_key() {
        let env = sealed(b"x");
        let err = env
            .verify(&CryptoEngine::new(), fixtures::mallory().public_key())
            .unwrap_err();
        assert_eq!(err, CryptoError::SignatureInvalid);
    }

    #[test]
    fn test_unknown_algorithm_tag_rejected() {
        let mut env = sealed(b"x");
        env.algorithm_tag = "cipherchat/v0:rsa1024".into();
        assert_eq!(
            env.verify(&CryptoEngine::new(), fixtures::alice().public_key())
                .unwrap_err(),
            CryptoError::UnsupportedAlgorithm("cipherchat/v0:rsa1024".into())
        );
    }

    #[test]
    fn test_json_round_trip_preserves_signature() {
        let env = sealed(b"over the wire");
        let json = env.to_json().unwrap();
        let parsed = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed, env);

        let verified = parsed
            .verify(&CryptoEngine::new(), fixtures::alice().public_key())
            .unwrap();
        assert_eq!(verified.decrypt(fixtures::bob()).unwrap(), b"over the wire");
    }

    #[test]
    fn test_json_field_names_and_encoding() {
        let env = sealed(b"x");
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "algorithm_tag",
                "ciphertext",
                "iv",
                "recipient",
                "sender",
                "signature",
                "timestamp",
                "wrapped_key"
            ]
        );
        assert_eq!(obj["timestamp"], T0);
        // 16 bytes of IV is 24 characters of padded base64
        assert_eq!(obj["iv"].as_str().unwrap().len(), 24);
    }

    #[test]
    fn test_from_json_rejects_malformed_input() {
        let env = sealed(b"x");
        let mut value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        let mut extra = value.clone();
        extra["plaintext"] = "leak".into();
        assert!(matches!(
            Envelope::from_json(&extra.to_string()),
            Err(CryptoError::MalformedEnvelope(_))
        ));

        value["iv"] = "***not base64***".into();
        assert!(matches!(
            Envelope::from_json(&value.to_string()),
            Err(CryptoError::MalformedEnvelope(_))
        ));

        assert!(matches!(
            Envelope::from_json("{\"sender\":\"alice\"}"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::from_json_slice(b"\xff\xfe"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_canonical_bytes_match_signing_bytes() {
        let env = sealed(b"x");
        assert_eq!(
            env.canonical_bytes().unwrap(),
            envelope_signing_bytes(
                &env.ciphertext,
                &env.iv,
                &env.wrapped_key,
                env.timestamp,
                &env.sender,
                &env.recipient
            )
            .unwrap()
        );
    }
}
