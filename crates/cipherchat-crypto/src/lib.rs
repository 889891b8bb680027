#![forbid(unsafe_code)]

pub mod hash;
pub mod transcript;
pub mod keys;
pub mod engine;

pub mod envelope;
pub mod utils;

#[cfg(test)]
pub(crate) mod fixtures;

#[cfg(test)]
mod proptests;

pub use engine::{CryptoEngine, CryptoError, HybridCiphertext};
pub use envelope::{Envelope, VerifiedEnvelope, ALGORITHM_TAG};
pub use keys::{KeyMaterial, PublicKey, RSA_MODULUS_BITS};
