//! Send/receive protocol.
//!
//! Receive processing order:
//!
//! 1. recipient matches the local handle
//! 2. algorithm tag is supported
//! 3. ciphertext within the size limit
//! 4. sender's public key is known
//! 5. signature verifies over the canonical encoding
//! 6. timestamp inside the freshness window
//! 7. not a duplicate (only with `reject_duplicates`)
//! 8. unwrap and decrypt
//!
//! Any failure is terminal. Decryption is never attempted on an envelope that
//! did not pass every earlier step.

use chrono::{DateTime, Utc};
use cipherchat_crypto::hash::sha256;
use cipherchat_crypto::utils::parse_fingerprint;
use cipherchat_crypto::{CryptoEngine, Envelope};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::errors::CoreError;
use crate::freshness::{FreshnessWindow, ReplayCache};
use crate::introduction::KeyIntroduction;
use crate::store::KeyResolver;
use crate::types::{unix_now, Handle, PublicKeyRecord};

/// AES block size; PKCS#7 adds at most one block to the plaintext.
const CIPHER_BLOCK_LEN: usize = 16;

/// Result of a successful [`SecureChannel::receive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub plaintext: Vec<u8>,
    /// Sender whose signature was verified.
    pub sender: Handle,
    /// Unix seconds, as signed by the sender.
    pub timestamp: u64,
}

impl ReceivedMessage {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }
}

pub struct SecureChannel<R: KeyResolver> {
    resolver: R,
    engine: CryptoEngine,
    config: ChannelConfig,
    freshness: FreshnessWindow,
    replay: Option<ReplayCache>,
}

impl<R: KeyResolver> SecureChannel<R> {
    pub fn new(resolver: R, config: ChannelConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let freshness = FreshnessWindow::from_config(&config);
        let replay = config
            .reject_duplicates
            .then(|| ReplayCache::new(freshness));
        Ok(Self {
            resolver,
            engine: CryptoEngine::new(),
            config,
            freshness,
            replay,
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn send(
        &self,
        sender: &str,
        recipient: &str,
        plaintext: &[u8],
    ) -> Result<Envelope, CoreError> {
        self.send_at(sender, recipient, plaintext, unix_now())
    }

    /// [`send`](Self::send) with an explicit timestamp.
    pub fn send_at(
        &self,
        sender: &str,
        recipient: &str,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<Envelope, CoreError> {
        let sender = Handle::new(sender)?;
        let recipient = Handle::new(recipient)?;
        if plaintext.len() > self.config.max_message_size {
            return Err(CoreError::MessageTooLarge {
                size: plaintext.len(),
                limit: self.config.max_message_size,
            });
        }

        let recipient_key = self.resolver.resolve_public(&recipient).map_err(|e| match e {
            CoreError::KeyNotFound(h) => CoreError::RecipientKeyMissing(h),
            other => other,
        })?;
        let sender_keys = self.resolver.load_private(&sender).map_err(|e| match e {
            CoreError::KeyNotFound(h) => CoreError::SenderKeyMissing(h),
            other => other,
        })?;

        let envelope = Envelope::seal(
            &self.engine,
            sender.as_str(),
            recipient.as_str(),
            plaintext,
            &recipient_key,
            &sender_keys,
            timestamp,
        )?;
        debug!(
            sender = %sender,
            recipient = %recipient,
            fingerprint = %recipient_key.fingerprint_hex(),
            "envelope sealed"
        );
        Ok(envelope)
    }

    pub fn receive(
        &self,
        envelope: &Envelope,
        recipient: &str,
    ) -> Result<ReceivedMessage, CoreError> {
        self.receive_at(envelope, recipient, unix_now())
    }

    /// [`receive`](Self::receive) against an explicit clock.
    pub fn receive_at(
        &self,
        envelope: &Envelope,
        recipient: &str,
        now: u64,
    ) -> Result<ReceivedMessage, CoreError> {
        self.open(envelope, recipient, now).map_err(|err| {
            warn!(
                sender = %envelope.sender,
                recipient = %recipient,
                reason = err.kind(),
                "envelope rejected"
            );
            err
        })
    }

    fn open(
        &self,
        envelope: &Envelope,
        recipient: &str,
        now: u64,
    ) -> Result<ReceivedMessage, CoreError> {
        let local = Handle::new(recipient)?;
        if envelope.recipient != local.as_str() {
            return Err(CoreError::WrongRecipient {
                expected: local.to_string(),
                actual: envelope.recipient.clone(),
            });
        }
        envelope.check_algorithm()?;

        let limit = self.config.max_message_size.saturating_add(CIPHER_BLOCK_LEN);
        if envelope.ciphertext.len() > limit {
            return Err(CoreError::MessageTooLarge {
                size: envelope.ciphertext.len(),
                limit,
            });
        }

        // A sender name that is not a valid handle can never have been imported.
        let sender = Handle::new(envelope.sender.as_str())
            .map_err(|_| CoreError::UnknownSender(envelope.sender.clone()))?;
        let sender_key = self.resolver.resolve_public(&sender).map_err(|e| match e {
            CoreError::KeyNotFound(h) => CoreError::UnknownSender(h),
            other => other,
        })?;

        let verified = envelope.verify(&self.engine, &sender_key)?;
        debug!(sender = %sender, recipient = %local, "envelope signature verified");

        self.freshness.check(verified.timestamp(), now)?;
        if let Some(replay) = &self.replay {
            replay.check_and_insert(sha256(verified.signature()), verified.timestamp(), now)?;
        }

        let keys = self.resolver.load_private(&local)?;
        let plaintext = verified.decrypt(&keys)?;
        debug!(sender = %sender, recipient = %local, "envelope decrypted");

        Ok(ReceivedMessage {
            plaintext,
            sender,
            timestamp: verified.timestamp(),
        })
    }

    /// Build a signed introduction of `sender`'s public key for `recipient`.
    pub fn introduce(&self, sender: &str, recipient: &str) -> Result<KeyIntroduction, CoreError> {
        self.introduce_at(sender, recipient, unix_now())
    }

    pub fn introduce_at(
        &self,
        sender: &str,
        recipient: &str,
        timestamp: u64,
    ) -> Result<KeyIntroduction, CoreError> {
        let sender = Handle::new(sender)?;
        let recipient = Handle::new(recipient)?;
        let keys = self.resolver.load_private(&sender).map_err(|e| match e {
            CoreError::KeyNotFound(h) => CoreError::SenderKeyMissing(h),
            other => other,
        })?;
        KeyIntroduction::create(
            &self.engine,
            sender.as_str(),
            recipient.as_str(),
            &keys,
            timestamp,
        )
    }

    /// Validate an introduction addressed to `local` and import its key.
    ///
    /// When `expected_fingerprint` is given (hex, `:` separators allowed) the
    /// key must match it.
    pub fn accept_introduction(
        &self,
        intro: &KeyIntroduction,
        local: &str,
        expected_fingerprint: Option<&str>,
    ) -> Result<PublicKeyRecord, CoreError> {
        self.accept_introduction_at(intro, local, expected_fingerprint, unix_now())
    }

    pub fn accept_introduction_at(
        &self,
        intro: &KeyIntroduction,
        local: &str,
        expected_fingerprint: Option<&str>,
        now: u64,
    ) -> Result<PublicKeyRecord, CoreError> {
        let local = Handle::new(local)?;
        if intro.recipient != local.as_str() {
            return Err(CoreError::WrongRecipient {
                expected: local.to_string(),
                actual: intro.recipient.clone(),
            });
        }
        let sender = Handle::new(intro.sender.as_str())?;

        let key = intro.parse_key()?;
        if !intro.is_self_signed_by(&key, &self.engine) {
            warn!(sender = %sender, reason = "signature_invalid", "introduction rejected");
            return Err(CoreError::SignatureInvalid);
        }
        self.freshness.check(intro.timestamp, now)?;

        let actual = key.fingerprint_hex();
        if let Some(expected) = expected_fingerprint {
            let matches = parse_fingerprint(expected)
                .map(|fp| key.matches_fingerprint(&fp))
                .unwrap_or(false);
            if !matches {
                warn!(
                    sender = %sender,
                    fingerprint = %actual,
                    reason = "fingerprint_mismatch",
                    "introduction rejected"
                );
                return Err(CoreError::FingerprintMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let record = self.resolver.import_public(&sender, intro.public_key.as_bytes())?;
        info!(
            sender = %sender,
            fingerprint = %actual,
            verified = expected_fingerprint.is_some(),
            "introduction accepted"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::MAX_MESSAGE_SIZE_LIMIT;
    use crate::store::{KeyStore, MemoryBackend};
    use crate::types::ReplacePolicy;

    const NOW: u64 = 1_760_000_000;

    /// alice and bob each know the other's public key.
    fn pair() -> (Arc<KeyStore<MemoryBackend>>, Arc<KeyStore<MemoryBackend>>) {
        let alice_store = Arc::new(KeyStore::in_memory());
        let bob_store = Arc::new(KeyStore::in_memory());
        let alice = Handle::new("alice").unwrap();
        let bob = Handle::new("bob").unwrap();

        alice_store.generate(&alice, ReplacePolicy::Refuse).unwrap();
        bob_store.generate(&bob, ReplacePolicy::Refuse).unwrap();
        alice_store
            .import_public(&bob, bob_store.export_public(&bob).unwrap().as_bytes())
            .unwrap();
        bob_store
            .import_public(&alice, alice_store.export_public(&alice).unwrap().as_bytes())
            .unwrap();
        (alice_store, bob_store)
    }

    fn channel(
        store: &Arc<KeyStore<MemoryBackend>>,
        config: ChannelConfig,
    ) -> SecureChannel<Arc<KeyStore<MemoryBackend>>> {
        SecureChannel::new(Arc::clone(store), config).unwrap()
    }

    #[test]
    fn test_send_receive() {
        let (a, b) = pair();
        let env = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", b"meet at 9", NOW)
            .unwrap();
        let msg = channel(&b, ChannelConfig::default())
            .receive_at(&env, "bob", NOW + 5)
            .unwrap();

        assert_eq!(msg.plaintext, b"meet at 9");
        assert_eq!(msg.sender.as_str(), "alice");
        assert_eq!(msg.timestamp, NOW);
        assert_eq!(msg.sent_at().unwrap().timestamp(), NOW as i64);
    }

    #[test]
    fn test_send_key_errors() {
        let (a, _) = pair();
        let ch = channel(&a, ChannelConfig::default());
        assert_eq!(
            ch.send_at("alice", "carol", b"x", NOW).unwrap_err(),
            CoreError::RecipientKeyMissing("carol".into())
        );
        // bob's public key is known to alice, his private key is not
        assert_eq!(
            ch.send_at("bob", "alice", b"x", NOW).unwrap_err(),
            CoreError::SenderKeyMissing("bob".into())
        );
        assert!(matches!(
            ch.send_at("a!", "bob", b"x", NOW),
            Err(CoreError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_message_size_limit() {
        let (a, b) = pair();
        let config = ChannelConfig {
            max_message_size: 32,
            ..Default::default()
        };
        let sender = channel(&a, config.clone());
        assert_eq!(
            sender.send_at("alice", "bob", &[0u8; 33], NOW).unwrap_err(),
            CoreError::MessageTooLarge { size: 33, limit: 32 }
        );
        let env = sender.send_at("alice", "bob", &[0u8; 32], NOW).unwrap();
        assert_eq!(env.ciphertext.len(), 48);
        channel(&b, config.clone()).receive_at(&env, "bob", NOW).unwrap();

        // a larger ciphertext is refused before any signature work
        let big = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", &[0u8; 64], NOW)
            .unwrap();
        assert!(matches!(
            channel(&b, config).receive_at(&big, "bob", NOW),
            Err(CoreError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_unbounded_message_size_is_refused() {
        let store = Arc::new(KeyStore::in_memory());
        let config = ChannelConfig {
            max_message_size: usize::MAX,
            ..Default::default()
        };
        assert!(matches!(
            SecureChannel::new(store, config),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_largest_message_size_receives() {
        let (a, b) = pair();
        let config = ChannelConfig {
            max_message_size: MAX_MESSAGE_SIZE_LIMIT,
            ..Default::default()
        };
        let env = channel(&a, config.clone())
            .send_at("alice", "bob", b"within limits", NOW)
            .unwrap();
        let msg = channel(&b, config).receive_at(&env, "bob", NOW).unwrap();
        assert_eq!(msg.plaintext, b"within limits");
    }

    #[test]
    fn test_check_order_recipient_before_sender() {
        let (a, _) = pair();
        let env = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", b"x", NOW)
            .unwrap();
        // carol's store knows nobody, but the recipient check comes first
        let carol_store = Arc::new(KeyStore::in_memory());
        let err = channel(&carol_store, ChannelConfig::default())
            .receive_at(&env, "carol", NOW)
            .unwrap_err();
        assert!(matches!(err, CoreError::WrongRecipient { .. }));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let (a, b) = pair();
        let mut env = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", b"x", NOW)
            .unwrap();
        env.algorithm_tag = "cipherchat/v2:future".into();
        assert_eq!(
            channel(&b, ChannelConfig::default())
                .receive_at(&env, "bob", NOW)
                .unwrap_err(),
            CoreError::UnsupportedAlgorithm("cipherchat/v2:future".into())
        );
    }

    #[test]
    fn test_future_timestamp_is_stale() {
        let (a, b) = pair();
        let env = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", b"x", NOW + 301)
            .unwrap();
        assert!(matches!(
            channel(&b, ChannelConfig::default()).receive_at(&env, "bob", NOW),
            Err(CoreError::StaleMessage { .. })
        ));
    }

    #[test]
    fn test_duplicate_rejection_is_opt_in() {
        let (a, b) = pair();
        let env = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", b"once", NOW)
            .unwrap();

        let lenient = channel(&b, ChannelConfig::default());
        lenient.receive_at(&env, "bob", NOW).unwrap();
        lenient.receive_at(&env, "bob", NOW).unwrap();

        let strict = channel(
            &b,
            ChannelConfig {
                reject_duplicates: true,
                ..Default::default()
            },
        );
        strict.receive_at(&env, "bob", NOW).unwrap();
        assert_eq!(
            strict.receive_at(&env, "bob", NOW + 1).unwrap_err(),
            CoreError::Replayed
        );
    }

    #[test]
    fn test_replay_cache_untouched_by_forgeries() {
        let (a, b) = pair();
        let mut env = channel(&a, ChannelConfig::default())
            .send_at("alice", "bob", b"x", NOW)
            .unwrap();
        let strict = channel(
            &b,
            ChannelConfig {
                reject_duplicates: true,
                ..Default::default()
            },
        );
        let original = env.ciphertext.clone();
        env.ciphertext[0] ^= 1;
        assert_eq!(
            strict.receive_at(&env, "bob", NOW).unwrap_err(),
            CoreError::SignatureInvalid
        );
        env.ciphertext = original;
        strict.receive_at(&env, "bob", NOW).unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let store = Arc::new(KeyStore::in_memory());
        let config = ChannelConfig {
            freshness_window_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            SecureChannel::new(store, config),
            Err(CoreError::Config(_))
        ));
    }
}
