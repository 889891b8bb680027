//! On-disk key backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! identities/<handle>/private.pem    PKCS#8, owner read/write only
//! identities/<handle>/public.pem     SPKI
//! identities/<handle>/metadata.json
//! imported/<handle>.pem              SPKI
//! imported/<handle>.json             {handle, imported_at, fingerprint}
//! ```
//!
//! Every file is written to a temp file, synced, then renamed into place. An
//! identity is written whole into `identities/.<handle>.new/` and swapped in
//! with directory renames, so its key files always come from the same
//! generation. The previous directory waits at `identities/.<handle>.old/`
//! until the swap completes. [`FileBackend::open`] finishes or rolls back a
//! swap cut short by a crash.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cipherchat_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::config::KeyStoreConfig;
use crate::errors::CoreError;
use crate::store::{KeyBackend, StoredIdentity, StoredImport};
use crate::types::{Handle, IdentityMetadata};

const IDENTITIES_DIR: &str = "identities";
const IMPORTED_DIR: &str = "imported";
const PRIVATE_FILE: &str = "private.pem";
const PUBLIC_FILE: &str = "public.pem";
const METADATA_FILE: &str = "metadata.json";

const DIR_MODE: u32 = 0o700;
const PRIVATE_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

/// Sidecar written next to an imported key.
#[derive(Debug, Serialize, Deserialize)]
struct ImportedMetadata {
    handle: Handle,
    imported_at: DateTime<Utc>,
    fingerprint: String,
}

pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a key store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        for dir in [root.clone(), root.join(IDENTITIES_DIR), root.join(IMPORTED_DIR)] {
            create_private_dir(&dir)
                .map_err(|e| CoreError::storage("create directory", &dir.display().to_string(), e))?;
        }
        let backend = Self { root };
        backend.recover_swaps()?;
        Ok(backend)
    }

    pub fn from_config(config: &KeyStoreConfig) -> Result<Self, CoreError> {
        Self::open(config.require_path()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_dir(&self, handle: &Handle) -> PathBuf {
        self.root.join(IDENTITIES_DIR).join(handle.as_str())
    }

    fn staging_dir(&self, handle: &Handle) -> PathBuf {
        self.root
            .join(IDENTITIES_DIR)
            .join(format!(".{}.new", handle.as_str()))
    }

    fn backup_dir(&self, handle: &Handle) -> PathBuf {
        self.root
            .join(IDENTITIES_DIR)
            .join(format!(".{}.old", handle.as_str()))
    }

    /// Restore backups whose replacement never landed and drop leftover
    /// staging directories.
    fn recover_swaps(&self) -> Result<(), CoreError> {
        let dir = self.root.join(IDENTITIES_DIR);
        // Collected up front: recovery renames entries of this directory.
        let entries = fs::read_dir(&dir)
            .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
            .map_err(|e| CoreError::storage("scan identities", "*", e))?;
        for entry in entries {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(handle) = name
                .strip_prefix('.')
                .and_then(|rest| rest.strip_suffix(".new").or_else(|| rest.strip_suffix(".old")))
                .and_then(|h| Handle::new(h).ok())
            else {
                continue;
            };
            if name.ends_with(".new") {
                warn!(handle = %handle, "discarding unfinished identity write");
                remove_dir_if_present(&entry.path())
                    .map_err(|e| CoreError::storage("discard staged identity", handle.as_str(), e))?;
            } else {
                self.settle_backup(&handle)?;
            }
        }
        Ok(())
    }

    /// Resolve a backup left by an interrupted swap: restore it if the live
    /// directory is unusable, otherwise delete it.
    fn settle_backup(&self, handle: &Handle) -> Result<(), CoreError> {
        let backup = self.backup_dir(handle);
        if !backup.exists() {
            return Ok(());
        }
        let live = self.identity_dir(handle);
        let result = if live.join(PRIVATE_FILE).is_file() {
            remove_dir_if_present(&backup)
        } else {
            warn!(handle = %handle, "restoring identity from interrupted replace");
            remove_dir_if_present(&live).and_then(|()| fs::rename(&backup, &live))
        };
        result.map_err(|e| CoreError::storage("recover identity", handle.as_str(), e))
    }

    fn imported_pem(&self, handle: &Handle) -> PathBuf {
        self.root
            .join(IMPORTED_DIR)
            .join(format!("{}.pem", handle.as_str()))
    }

    fn imported_meta(&self, handle: &Handle) -> PathBuf {
        self.root
            .join(IMPORTED_DIR)
            .join(format!("{}.json", handle.as_str()))
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))?;
    }
    Ok(())
}

fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Replace `live` with `staged` using `backup` as the holding place for the
/// old directory. On failure the old directory is put back.
fn swap_dirs(staged: &Path, live: &Path, backup: &Path) -> io::Result<()> {
    let had_live = match fs::rename(live, backup) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    if let Err(e) = fs::rename(staged, live) {
        if had_live {
            fs::rename(backup, live)?;
        }
        return Err(e);
    }
    // The swap has happened; a backup left here is removed by the next write
    // or open.
    if had_live {
        if let Err(e) = fs::remove_dir_all(backup) {
            warn!(path = %backup.display(), error = %e, "could not remove replaced identity");
        }
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Write `contents` to `path` via a synced temp file and rename.
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad file name"))?;
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&temp_path)?;
    // The mode passed to open is filtered by the umask and ignored for
    // existing files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}

/// `Ok(None)` for a missing file.
fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Handles found as entries of `dir`, mapped through `name_of`. Entries that
/// are not valid handles are ignored.
fn list_handles(
    dir: &Path,
    name_of: impl Fn(&fs::DirEntry) -> Option<String>,
) -> io::Result<Vec<Handle>> {
    let mut handles = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(handle) = name_of(&entry).and_then(|name| Handle::new(name).ok()) {
            handles.push(handle);
        }
    }
    Ok(handles)
}

/// Write all of an identity's files into `dir`.
fn stage_identity(dir: &Path, identity: &StoredIdentity, metadata: &[u8]) -> Result<(), CoreError> {
    let handle = identity.metadata.handle.as_str();
    create_private_dir(dir).map_err(|e| CoreError::storage("stage identity", handle, e))?;
    write_atomic(&dir.join(PUBLIC_FILE), identity.public_pem.as_bytes(), PUBLIC_MODE)
        .map_err(|e| CoreError::storage("write public key", handle, e))?;
    write_atomic(&dir.join(METADATA_FILE), metadata, PUBLIC_MODE)
        .map_err(|e| CoreError::storage("write metadata", handle, e))?;
    write_atomic(
        &dir.join(PRIVATE_FILE),
        identity.private_pem.as_bytes(),
        PRIVATE_MODE,
    )
    .map_err(|e| CoreError::storage("write private key", handle, e))?;
    sync_dir(dir).map_err(|e| CoreError::storage("sync identity", handle, e))
}

impl KeyBackend for FileBackend {
    fn identity_exists(&self, handle: &Handle) -> Result<bool, CoreError> {
        Ok(self.identity_dir(handle).join(PRIVATE_FILE).is_file())
    }

    fn write_identity(&self, identity: &StoredIdentity) -> Result<(), CoreError> {
        let id = &identity.metadata.handle;
        let handle = id.as_str();
        let metadata = serde_json::to_vec_pretty(&identity.metadata)
            .map_err(|e| CoreError::storage("encode metadata", handle, e))?;

        self.settle_backup(id)?;
        let staged = self.staging_dir(id);
        let result = stage_identity(&staged, identity, &metadata).and_then(|()| {
            swap_dirs(&staged, &self.identity_dir(id), &self.backup_dir(id))
                .map_err(|e| CoreError::storage("commit identity", handle, e))?;
            // Committed; a failed directory sync only weakens durability.
            if let Err(e) = sync_dir(&self.root.join(IDENTITIES_DIR)) {
                warn!(handle = %id, error = %e, "could not sync identities directory");
            }
            Ok(())
        });
        if result.is_err() {
            if let Err(e) = remove_dir_if_present(&staged) {
                warn!(handle = %id, error = %e, "could not remove staged identity");
            }
        }
        result
    }

    fn read_identity(&self, handle: &Handle) -> Result<Option<StoredIdentity>, CoreError> {
        let dir = self.identity_dir(handle);
        let Some(private_pem) = read_optional(&dir.join(PRIVATE_FILE))
            .map_err(|e| CoreError::storage("read private key", handle.as_str(), e))?
        else {
            return Ok(None);
        };
        let private_pem = Zeroizing::new(private_pem);

        let public_pem = self
            .read_identity_public(handle)?
            .ok_or_else(|| CoreError::storage("read public key", handle.as_str(), "missing"))?;
        let metadata = self
            .read_identity_metadata(handle)?
            .ok_or_else(|| CoreError::storage("read metadata", handle.as_str(), "missing"))?;

        Ok(Some(StoredIdentity {
            private_pem,
            public_pem,
            metadata,
        }))
    }

    fn read_identity_public(&self, handle: &Handle) -> Result<Option<String>, CoreError> {
        if !self.identity_exists(handle)? {
            return Ok(None);
        }
        read_optional(&self.identity_dir(handle).join(PUBLIC_FILE))
            .map_err(|e| CoreError::storage("read public key", handle.as_str(), e))
    }

    fn read_identity_metadata(
        &self,
        handle: &Handle,
    ) -> Result<Option<IdentityMetadata>, CoreError> {
        if !self.identity_exists(handle)? {
            return Ok(None);
        }
        let Some(text) = read_optional(&self.identity_dir(handle).join(METADATA_FILE))
            .map_err(|e| CoreError::storage("read metadata", handle.as_str(), e))?
        else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CoreError::storage("decode metadata", handle.as_str(), e))
    }

    fn delete_identity(&self, handle: &Handle) -> Result<bool, CoreError> {
        // A stale backup would otherwise bring the identity back on reopen.
        remove_dir_if_present(&self.backup_dir(handle))
            .map_err(|e| CoreError::storage("delete identity", handle.as_str(), e))?;
        let dir = self.identity_dir(handle);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::storage("delete identity", handle.as_str(), e)),
        }
    }

    fn list_identities(&self) -> Result<Vec<Handle>, CoreError> {
        let dir = self.root.join(IDENTITIES_DIR);
        list_handles(&dir, |entry| {
            if !entry.path().join(PRIVATE_FILE).is_file() {
                return None;
            }
            entry.file_name().to_str().map(str::to_owned)
        })
        .map_err(|e| CoreError::storage("list identities", "*", e))
    }

    fn write_imported(&self, import: &StoredImport) -> Result<(), CoreError> {
        let handle = import.handle.as_str();
        let fingerprint = PublicKey::from_pem(&import.public_pem)
            .map(|key| key.fingerprint_hex())
            .map_err(|_| CoreError::InvalidKeyFormat)?;
        let sidecar = ImportedMetadata {
            handle: import.handle.clone(),
            imported_at: import.imported_at.unwrap_or_else(Utc::now),
            fingerprint,
        };
        let sidecar = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| CoreError::storage("encode import metadata", handle, e))?;

        write_atomic(&self.imported_meta(&import.handle), &sidecar, PUBLIC_MODE)
            .map_err(|e| CoreError::storage("write import metadata", handle, e))?;
        write_atomic(
            &self.imported_pem(&import.handle),
            import.public_pem.as_bytes(),
            PUBLIC_MODE,
        )
        .map_err(|e| CoreError::storage("write imported key", handle, e))
    }

    fn read_imported(&self, handle: &Handle) -> Result<Option<StoredImport>, CoreError> {
        let Some(public_pem) = read_optional(&self.imported_pem(handle))
            .map_err(|e| CoreError::storage("read imported key", handle.as_str(), e))?
        else {
            return Ok(None);
        };
        // A PEM dropped in by hand has no sidecar; that is not an error.
        let imported_at = read_optional(&self.imported_meta(handle))
            .ok()
            .flatten()
            .and_then(|text| serde_json::from_str::<ImportedMetadata>(&text).ok())
            .map(|meta| meta.imported_at);

        Ok(Some(StoredImport {
            handle: handle.clone(),
            public_pem,
            imported_at,
        }))
    }

    fn delete_imported(&self, handle: &Handle) -> Result<bool, CoreError> {
        let removed = match fs::remove_file(self.imported_pem(handle)) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(CoreError::storage("delete imported key", handle.as_str(), e)),
        };
        match fs::remove_file(self.imported_meta(handle)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::storage("delete import metadata", handle.as_str(), e)),
        }
        Ok(removed)
    }

    fn list_imported(&self) -> Result<Vec<Handle>, CoreError> {
        let dir = self.root.join(IMPORTED_DIR);
        list_handles(&dir, |entry| {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pem") {
                return None;
            }
            path.file_stem().and_then(|stem| stem.to_str()).map(str::to_owned)
        })
        .map_err(|e| CoreError::storage("list imported keys", "*", e))
    }
}
