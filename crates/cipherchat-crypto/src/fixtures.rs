//! Shared test identities. RSA-2048 generation is slow, so each key pair is
//! generated once per test binary.

use std::sync::OnceLock;

use crate::engine::CryptoEngine;
use crate::keys::KeyMaterial;

static ALICE: OnceLock<KeyMaterial> = OnceLock::new();
static BOB: OnceLock<KeyMaterial> = OnceLock::new();
static MALLORY: OnceLock<KeyMaterial> = OnceLock::new();

fn generate() -> KeyMaterial {
    CryptoEngine::new()
        .generate_keypair()
        .expect("test key generation")
}

pub fn alice() -> &'static KeyMaterial {
    ALICE.get_or_init(generate)
}

pub fn bob() -> &'static KeyMaterial {
    BOB.get_or_init(generate)
}

pub fn mallory() -> &'static KeyMaterial {
    MALLORY.get_or_init(generate)
}
