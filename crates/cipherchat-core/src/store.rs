//! Key storage for CipherChat identities.
//!
//! [`KeyStore`] owns validation, locking and logging; a [`KeyBackend`] only
//! moves already-encoded records in and out of storage. Two backends ship:
//! [`MemoryBackend`] here and [`crate::file_store::FileBackend`] on disk.
//!
//! Writers are serialized per handle. Operations on different handles never
//! contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cipherchat_crypto::{CryptoEngine, KeyMaterial, PublicKey, ALGORITHM_TAG};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::errors::CoreError;
use crate::types::{Handle, IdentityMetadata, PublicKeyRecord, ReplacePolicy};

/// Largest key encoding `import_public` will parse.
pub const MAX_KEY_BYTES: usize = 10 * 1024;

// ============================================================================
// Stored Records
// ============================================================================

/// An identity's key pair as held by a backend.
#[derive(Clone)]
pub struct StoredIdentity {
    /// PKCS#8 PEM. Wiped on drop.
    pub private_pem: Zeroizing<String>,
    pub public_pem: String,
    pub metadata: IdentityMetadata,
}

impl std::fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// An imported public key as held by a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredImport {
    pub handle: Handle,
    pub public_pem: String,
    /// `None` when the key was placed in storage without metadata.
    pub imported_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Raw persistence for identities and imported keys.
///
/// Implementations need not lock: [`KeyStore`] holds the per-handle lock
/// around every call.
pub trait KeyBackend: Send + Sync {
    fn identity_exists(&self, handle: &Handle) -> Result<bool, CoreError>;

    fn write_identity(&self, identity: &StoredIdentity) -> Result<(), CoreError>;

    fn read_identity(&self, handle: &Handle) -> Result<Option<StoredIdentity>, CoreError>;

    /// Public half only, so resolving one's own key never touches the
    /// private PEM.
    fn read_identity_public(&self, handle: &Handle) -> Result<Option<String>, CoreError>;

    fn read_identity_metadata(
        &self,
        handle: &Handle,
    ) -> Result<Option<IdentityMetadata>, CoreError>;

    /// Returns `true` if something was deleted.
    fn delete_identity(&self, handle: &Handle) -> Result<bool, CoreError>;

    fn list_identities(&self) -> Result<Vec<Handle>, CoreError>;

    fn write_imported(&self, import: &StoredImport) -> Result<(), CoreError>;

    fn read_imported(&self, handle: &Handle) -> Result<Option<StoredImport>, CoreError>;

    fn delete_imported(&self, handle: &Handle) -> Result<bool, CoreError>;

    fn list_imported(&self) -> Result<Vec<Handle>, CoreError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// Thread-safe in-memory backend for tests and embedding.
#[derive(Default)]
pub struct MemoryBackend {
    identities: RwLock<HashMap<Handle, StoredIdentity>>,
    imported: RwLock<HashMap<Handle, StoredImport>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyBackend for MemoryBackend {
    fn identity_exists(&self, handle: &Handle) -> Result<bool, CoreError> {
        Ok(self.identities.read().contains_key(handle))
    }

    fn write_identity(&self, identity: &StoredIdentity) -> Result<(), CoreError> {
        self.identities
            .write()
            .insert(identity.metadata.handle.clone(), identity.clone());
        Ok(())
    }

    fn read_identity(&self, handle: &Handle) -> Result<Option<StoredIdentity>, CoreError> {
        Ok(self.identities.read().get(handle).cloned())
    }

    fn read_identity_public(&self, handle: &Handle) -> Result<Option<String>, CoreError> {
        Ok(self
            .identities
            .read()
            .get(handle)
            .map(|identity| identity.public_pem.clone()))
    }

    fn read_identity_metadata(
        &self,
        handle: &Handle,
    ) -> Result<Option<IdentityMetadata>, CoreError> {
        Ok(self
            .identities
            .read()
            .get(handle)
            .map(|identity| identity.metadata.clone()))
    }

    fn delete_identity(&self, handle: &Handle) -> Result<bool, CoreError> {
        Ok(self.identities.write().remove(handle).is_some())
    }

    fn list_identities(&self) -> Result<Vec<Handle>, CoreError> {
        Ok(self.identities.read().keys().cloned().collect())
    }

    fn write_imported(&self, import: &StoredImport) -> Result<(), CoreError> {
        self.imported
            .write()
            .insert(import.handle.clone(), import.clone());
        Ok(())
    }

    fn read_imported(&self, handle: &Handle) -> Result<Option<StoredImport>, CoreError> {
        Ok(self.imported.read().get(handle).cloned())
    }

    fn delete_imported(&self, handle: &Handle) -> Result<bool, CoreError> {
        Ok(self.imported.write().remove(handle).is_some())
    }

    fn list_imported(&self) -> Result<Vec<Handle>, CoreError> {
        Ok(self.imported.read().keys().cloned().collect())
    }
}

// ============================================================================
// Resolver Trait
// ============================================================================

/// The key lookups [`crate::channel::SecureChannel`] depends on.
pub trait KeyResolver: Send + Sync {
    /// Own identity's public key if `handle` is held locally, otherwise the
    /// imported record. `KeyNotFound` if neither exists.
    fn resolve_public(&self, handle: &Handle) -> Result<PublicKey, CoreError>;

    /// `KeyNotFound` if `handle` is not a local identity.
    fn load_private(&self, handle: &Handle) -> Result<KeyMaterial, CoreError>;

    /// Store or replace the imported public key for `handle`.
    fn import_public(&self, handle: &Handle, key_bytes: &[u8])
        -> Result<PublicKeyRecord, CoreError>;
}

impl<T: KeyResolver + ?Sized> KeyResolver for Arc<T> {
    fn resolve_public(&self, handle: &Handle) -> Result<PublicKey, CoreError> {
        (**self).resolve_public(handle)
    }

    fn load_private(&self, handle: &Handle) -> Result<KeyMaterial, CoreError> {
        (**self).load_private(handle)
    }

    fn import_public(
        &self,
        handle: &Handle,
        key_bytes: &[u8],
    ) -> Result<PublicKeyRecord, CoreError> {
        (**self).import_public(handle, key_bytes)
    }
}

// ============================================================================
// Key Store
// ============================================================================

pub struct KeyStore<B: KeyBackend> {
    backend: B,
    engine: CryptoEngine,
    locks: DashMap<Handle, Arc<Mutex<()>>>,
}

impl KeyStore<MemoryBackend> {
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: KeyBackend> KeyStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            engine: CryptoEngine::new(),
            locks: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `f` holding the lock for `handle`. The entry is dropped again once
    /// no other caller holds it, so lookups of arbitrary names leave nothing
    /// behind.
    fn with_lock<T>(&self, handle: &Handle, f: impl FnOnce() -> T) -> T {
        // The shard guard must be released before blocking on the handle lock.
        let lock = self.locks.entry(handle.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks
            .remove_if(handle, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Generate and persist a fresh key pair for `handle`.
    pub fn generate(
        &self,
        handle: &Handle,
        policy: ReplacePolicy,
    ) -> Result<IdentityMetadata, CoreError> {
        if policy == ReplacePolicy::Refuse && self.contains(handle)? {
            return Err(CoreError::IdentityExists(handle.to_string()));
        }

        let keys = self.engine.generate_keypair()?;
        let public = keys.public_key();
        let metadata = IdentityMetadata {
            handle: handle.clone(),
            created_at: Utc::now(),
            algorithm: ALGORITHM_TAG.to_string(),
            modulus_bits: public.modulus_bits(),
            fingerprint: public.fingerprint_hex(),
        };
        let stored = StoredIdentity {
            private_pem: keys.to_pkcs8_pem()?,
            public_pem: public.to_pem()?,
            metadata: metadata.clone(),
        };

        // Re-check under the lock: a concurrent generate may have won.
        let existed = self.with_lock(handle, || {
            let existed = self.backend.identity_exists(handle)?;
            if existed && policy == ReplacePolicy::Refuse {
                return Err(CoreError::IdentityExists(handle.to_string()));
            }
            self.backend.write_identity(&stored)?;
            Ok::<_, CoreError>(existed)
        })?;

        if existed {
            warn!(handle = %handle, fingerprint = %metadata.fingerprint, "identity key pair replaced");
        } else {
            info!(handle = %handle, fingerprint = %metadata.fingerprint, "identity key pair generated");
        }
        Ok(metadata)
    }

    pub fn contains(&self, handle: &Handle) -> Result<bool, CoreError> {
        self.with_lock(handle, || self.backend.identity_exists(handle))
    }

    pub fn load_private(&self, handle: &Handle) -> Result<KeyMaterial, CoreError> {
        let stored = self.with_lock(handle, || self.backend.read_identity(handle))?;
        let stored = stored.ok_or_else(|| CoreError::KeyNotFound(handle.to_string()))?;
        KeyMaterial::from_pkcs8_pem(&stored.private_pem).map_err(|_| {
            CoreError::storage("load private key", handle.as_str(), "stored key is corrupt")
        })
    }

    /// Validate `key_bytes` (PEM or DER SPKI, RSA-2048, at most
    /// [`MAX_KEY_BYTES`]) and store it as the imported key for `handle`.
    /// Latest import wins.
    pub fn import_public(
        &self,
        handle: &Handle,
        key_bytes: &[u8],
    ) -> Result<PublicKeyRecord, CoreError> {
        if key_bytes.len() > MAX_KEY_BYTES {
            return Err(CoreError::InvalidKeyFormat);
        }
        let public_key = PublicKey::from_bytes(key_bytes)?;
        let imported_at = Utc::now();
        let stored = StoredImport {
            handle: handle.clone(),
            public_pem: public_key.to_pem()?,
            imported_at: Some(imported_at),
        };

        let previous = self.with_lock(handle, || {
            let previous = self.backend.read_imported(handle)?;
            self.backend.write_imported(&stored)?;
            Ok::<_, CoreError>(previous)
        })?;

        let fingerprint = public_key.fingerprint_hex();
        match previous.and_then(|prev| PublicKey::from_pem(&prev.public_pem).ok()) {
            Some(prev) if prev != public_key => warn!(
                handle = %handle,
                fingerprint = %fingerprint,
                previous = %prev.fingerprint_hex(),
                "imported public key changed"
            ),
            _ => info!(handle = %handle, fingerprint = %fingerprint, "public key imported"),
        }

        Ok(PublicKeyRecord {
            handle: handle.clone(),
            public_key,
            imported_at,
        })
    }

    pub fn resolve_public(&self, handle: &Handle) -> Result<PublicKey, CoreError> {
        self.with_lock(handle, || {
            if let Some(pem) = self.backend.read_identity_public(handle)? {
                return PublicKey::from_pem(&pem).map_err(|_| {
                    CoreError::storage("load public key", handle.as_str(), "stored key is corrupt")
                });
            }
            match self.backend.read_imported(handle)? {
                Some(import) => PublicKey::from_pem(&import.public_pem).map_err(|_| {
                    CoreError::storage("load imported key", handle.as_str(), "stored key is corrupt")
                }),
                None => Err(CoreError::KeyNotFound(handle.to_string())),
            }
        })
    }

    /// Public key of `handle` as SPKI PEM, for out-of-band sharing.
    pub fn export_public(&self, handle: &Handle) -> Result<String, CoreError> {
        Ok(self.resolve_public(handle)?.to_pem()?)
    }

    pub fn metadata(&self, handle: &Handle) -> Result<IdentityMetadata, CoreError> {
        self.with_lock(handle, || self.backend.read_identity_metadata(handle))?
            .ok_or_else(|| CoreError::KeyNotFound(handle.to_string()))
    }

    pub fn list_identities(&self) -> Result<Vec<Handle>, CoreError> {
        let mut handles = self.backend.list_identities()?;
        handles.sort();
        Ok(handles)
    }

    /// Imported records sorted by handle. Records that no longer parse are
    /// skipped with a warning.
    pub fn list_imported(&self) -> Result<Vec<PublicKeyRecord>, CoreError> {
        let mut handles = self.backend.list_imported()?;
        handles.sort();

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(import) = self.with_lock(&handle, || self.backend.read_imported(&handle))?
            else {
                continue;
            };
            match PublicKey::from_pem(&import.public_pem) {
                Ok(public_key) => records.push(PublicKeyRecord {
                    handle,
                    public_key,
                    imported_at: import.imported_at.unwrap_or_default(),
                }),
                Err(_) => warn!(handle = %handle, reason = "unparseable", "skipping imported key"),
            }
        }
        Ok(records)
    }

    /// Destroy an identity's key material. Returns `false` if there was none.
    pub fn delete(&self, handle: &Handle) -> Result<bool, CoreError> {
        let deleted = self.with_lock(handle, || self.backend.delete_identity(handle))?;
        if deleted {
            info!(handle = %handle, "identity deleted");
        }
        Ok(deleted)
    }

    pub fn remove_imported(&self, handle: &Handle) -> Result<bool, CoreError> {
        let removed = self.with_lock(handle, || self.backend.delete_imported(handle))?;
        if removed {
            info!(handle = %handle, "imported public key removed");
        }
        Ok(removed)
    }
}

impl<B: KeyBackend> KeyResolver for KeyStore<B> {
    fn resolve_public(&self, handle: &Handle) -> Result<PublicKey, CoreError> {
        KeyStore::resolve_public(self, handle)
    }

    fn load_private(&self, handle: &Handle) -> Result<KeyMaterial, CoreError> {
        KeyStore::load_private(self, handle)
    }

    fn import_public(
        &self,
        handle: &Handle,
        key_bytes: &[u8],
    ) -> Result<PublicKeyRecord, CoreError> {
        KeyStore::import_public(self, handle, key_bytes)
    }
}
