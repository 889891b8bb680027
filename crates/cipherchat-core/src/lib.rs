//! CipherChat Core - key storage and secure channel orchestration.
//!
//! This crate implements:
//! - Identity handles and the error taxonomy
//! - The key store, with file and in-memory backends and per-handle locking
//! - The send/receive protocol over signed, encrypted envelopes
//! - Freshness windows and optional duplicate rejection
//! - Self-signed key introductions

#![forbid(unsafe_code)]

// Protocol
pub mod channel;
pub mod freshness;
pub mod introduction;

// Infrastructure
pub mod file_store;
pub mod store;

// Supporting modules
pub mod config;
pub mod errors;
pub mod types;

pub use channel::{ReceivedMessage, SecureChannel};
pub use config::{ChannelConfig, KeyStoreConfig};
pub use errors::CoreError;
pub use file_store::FileBackend;
pub use introduction::KeyIntroduction;
pub use store::{KeyBackend, KeyResolver, KeyStore, MemoryBackend, MAX_KEY_BYTES};
pub use types::{Handle, IdentityMetadata, PublicKeyRecord, ReplacePolicy};

pub use cipherchat_crypto::{Envelope, PublicKey};
