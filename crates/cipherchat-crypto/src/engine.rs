//! Stateless cryptographic primitives.
//!
//! Hybrid encryption: a fresh AES-256 key and IV per call, AES-256-CBC with
//! PKCS#7 padding for the payload, the AES key wrapped with RSA-OAEP/SHA-256.
//! Signatures: RSA-PSS/SHA-256.
//!
//! Nothing in here knows about identities or storage, and nothing holds state
//! between calls, so a single [`CryptoEngine`] can be shared across threads.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::OsRng;
use rsa::{Oaep, Pss, RsaPrivateKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::keys::{KeyMaterial, PublicKey, RSA_MODULUS_BITS};

/// AES-256 key length in bytes.
pub const SYMMETRIC_KEY_LEN: usize = 32;
/// AES block / CBC IV length in bytes.
pub const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key generation failed")]
    KeyGenerationFailed,
    #[error("invalid key format")]
    InvalidKeyFormat,
    #[error("encryption failed")]
    EncryptionFailed,
    /// Shares its message with `SignatureInvalid`.
    #[error("message could not be verified or decrypted")]
    DecryptionFailed,
    #[error("signing failed")]
    SigningFailed,
    #[error("secure random source unavailable")]
    RandomnessUnavailable,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("message could not be verified or decrypted")]
    SignatureInvalid,
    #[error("field {0} is too long to encode")]
    FieldTooLong(u32),
}

/// Output of [`CryptoEngine::hybrid_encrypt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridCiphertext {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub wrapped_key: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CryptoEngine;

impl CryptoEngine {
    pub fn new() -> Self {
        Self
    }

    /// Generate a 2048-bit RSA key pair from the OS random source.
    pub fn generate_keypair(&self) -> Result<KeyMaterial, CryptoError> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_MODULUS_BITS)
            .map_err(|_| CryptoError::KeyGenerationFailed)?;
        KeyMaterial::from_private(private).map_err(|_| CryptoError::KeyGenerationFailed)
    }

    /// Fill a fixed-size buffer from the OS random source.
    pub fn random_bytes<const N: usize>(&self) -> Result<[u8; N], CryptoError> {
        let mut buf = [0u8; N];
        getrandom::getrandom(&mut buf).map_err(|_| CryptoError::RandomnessUnavailable)?;
        Ok(buf)
    }

    /// Encrypt `plaintext` for the holder of `recipient`.
    ///
    /// Key and IV are drawn fresh on every call; the symmetric key is wiped
    /// before returning.
    pub fn hybrid_encrypt(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<HybridCiphertext, CryptoError> {
        let key = Zeroizing::new(self.random_bytes::<SYMMETRIC_KEY_LEN>()?);
        let iv = self.random_bytes::<IV_LEN>()?;

        let ciphertext = Aes256CbcEnc::new_from_slices(key.as_slice(), &iv)
            .map_err(|_| CryptoError::EncryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let wrapped_key = recipient
            .as_rsa()
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(HybridCiphertext {
            ciphertext,
            iv: iv.to_vec(),
            wrapped_key,
        })
    }

    /// Unwrap the session key and decrypt.
    ///
    /// Every failure (unwrap, key length, IV length, padding) is reported as
    /// the same `DecryptionFailed` so callers cannot tell which step failed.
    pub fn hybrid_decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        wrapped_key: &[u8],
        recipient: &KeyMaterial,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = recipient
            .private()
            .decrypt(Oaep::new::<Sha256>(), wrapped_key)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if key.len() != SYMMETRIC_KEY_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        Aes256CbcDec::new_from_slices(key.as_slice(), iv)
            .map_err(|_| CryptoError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// RSA-PSS/SHA-256 signature over `message`, with blinding.
    pub fn sign(&self, message: &[u8], signer: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
        let digest = Sha256::digest(message);
        signer
            .private()
            .sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &digest)
            .map_err(|_| CryptoError::SigningFailed)
    }

    /// Check an RSA-PSS/SHA-256 signature. Never errors: any malformed input
    /// is simply an invalid signature.
    pub fn verify(&self, message: &[u8], signature: &[u8], signer: &PublicKey) -> bool {
        let digest = Sha256::digest(message);
        signer
            .as_rsa()
            .verify(Pss::new::<Sha256>(), &digest, signature)
            .is_ok()
    }
}
