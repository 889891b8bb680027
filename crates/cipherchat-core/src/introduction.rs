//! Self-signed public key introductions.
//!
//! An introduction carries the sender's public key, signed by that same key,
//! and addressed to one recipient. A valid signature proves the sender holds
//! the private half. It does not prove who the sender is; only a fingerprint
//! compared out of band does that.

use cipherchat_crypto::transcript::{tags, Transcript};
use cipherchat_crypto::{CryptoEngine, CryptoError, KeyMaterial, PublicKey};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

const KEY_INTRO_DOMAIN: &str = "cipherchat_key_intro_v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyIntroduction {
    pub sender: String,
    pub recipient: String,
    /// SPKI PEM.
    pub public_key: String,
    /// Unix seconds, UTC.
    pub timestamp: u64,
    #[serde(with = "cipherchat_crypto::utils::serde_base64")]
    pub signature: Vec<u8>,
}

fn introduction_signing_bytes(
    sender: &str,
    recipient: &str,
    public_key_pem: &str,
    timestamp: u64,
) -> Result<Vec<u8>, CryptoError> {
    let mut t = Transcript::new(KEY_INTRO_DOMAIN);
    t.append_str(tags::SENDER, sender)
        .append_str(tags::RECIPIENT, recipient)
        .append_str(tags::PUBLIC_KEY, public_key_pem)
        .append_u64(tags::TIMESTAMP, timestamp);
    t.finish()
}

impl KeyIntroduction {
    pub fn create(
        engine: &CryptoEngine,
        sender: &str,
        recipient: &str,
        sender_keys: &KeyMaterial,
        timestamp: u64,
    ) -> Result<Self, CoreError> {
        let public_key = sender_keys.public_key().to_pem()?;
        let signature = engine.sign(
            &introduction_signing_bytes(sender, recipient, &public_key, timestamp)?,
            sender_keys,
        )?;
        Ok(Self {
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
            public_key,
            timestamp,
            signature,
        })
    }

    /// Parse the carried key.
    pub fn parse_key(&self) -> Result<PublicKey, CoreError> {
        Ok(PublicKey::from_pem(&self.public_key)?)
    }

    /// True if the signature verifies under the carried key.
    pub fn is_self_signed_by(&self, key: &PublicKey, engine: &CryptoEngine) -> bool {
        let Ok(bytes) = introduction_signing_bytes(
            &self.sender,
            &self.recipient,
            &self.public_key,
            self.timestamp,
        ) else {
            return false;
        };
        engine.verify(&bytes, &self.signature, key)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|e| CoreError::MalformedEnvelope(e.to_string()))
    }
}
