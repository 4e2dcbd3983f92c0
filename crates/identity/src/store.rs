//! Certificate storage.
//!
//! The [`CertificateStore`] trait is the seam between query construction and
//! persistence. [`MemoryCertificateStore`] keys credentials by the BLAKE3 hash
//! of their DER bytes, so saving the same credential twice is a no-op.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::ca_credential::CaCredential;
use crate::certificate::Certificate;
use crate::error::{IdentityError, IdentityResult};
use crate::selector::{matches, CertificateKind, Predicates};

/// File extensions picked up by [`MemoryCertificateStore::load_directory`].
pub const CREDENTIAL_EXTENSIONS: &[&str] = &["der", "cer", "crt", "pem"];

/// Keyed store of parsed credentials.
pub trait CertificateStore: Send + Sync {
    /// Every stored certificate of `kind` matching all `predicates`.
    ///
    /// Implementations must reject predicates on fields not indexed for
    /// `kind` with [`IdentityError::InvalidField`].
    fn find(&self, kind: CertificateKind, predicates: &Predicates) -> IdentityResult<Vec<Certificate>>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    certificates: RwLock<HashMap<[u8; 32], Certificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store containing every CA credential found in `dir`.
    pub fn from_directory(dir: impl AsRef<Path>) -> IdentityResult<Self> {
        let store = Self::new();
        store.load_directory(dir)?;
        Ok(store)
    }

    /// Insert a credential. Returns false when it was already present.
    ///
    /// A CA credential replaces a plain certificate with the same bytes, so
    /// CA selectors see it; the reverse is a no-op.
    pub fn save(&self, certificate: impl Into<Certificate>) -> IdentityResult<bool> {
        let certificate = certificate.into();
        let key = *certificate.content_hash();
        let mut guard = self.write()?;
        let upgrade = match guard.get(&key) {
            None => false,
            Some(Certificate::Plain(_)) if certificate.as_ca_credential().is_some() => true,
            Some(_) => return Ok(false),
        };
        debug!(
            subject = %certificate.subject(),
            kind = %certificate.kind(),
            upgrade,
            "Certificate stored"
        );
        guard.insert(key, certificate);
        Ok(true)
    }

    pub fn remove(&self, certificate: &Certificate) -> IdentityResult<bool> {
        Ok(self.write()?.remove(certificate.content_hash()).is_some())
    }

    pub fn contains(&self, certificate: &Certificate) -> IdentityResult<bool> {
        Ok(self
            .read()?
            .get(certificate.content_hash())
            .is_some_and(|stored| stored == certificate))
    }

    pub fn len(&self) -> usize {
        self.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse every credential file in `dir` as a CA credential and store it.
    /// Any unreadable or malformed file aborts the load.
    pub fn load_directory(&self, dir: impl AsRef<Path>) -> IdentityResult<usize> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| IdentityError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IdentityError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let is_credential = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| CREDENTIAL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_credential {
                paths.push(path);
            }
        }
        paths.sort();

        let mut added = 0;
        for path in &paths {
            let credential = CaCredential::from_path(path)?;
            if self.save(credential)? {
                added += 1;
            }
        }
        info!(directory = %dir.display(), added, "Trust store loaded");
        Ok(added)
    }

    fn read(&self) -> IdentityResult<std::sync::RwLockReadGuard<'_, HashMap<[u8; 32], Certificate>>> {
        self.certificates
            .read()
            .map_err(|_| IdentityError::Store("certificate map lock poisoned".to_string()))
    }

    fn write(&self) -> IdentityResult<std::sync::RwLockWriteGuard<'_, HashMap<[u8; 32], Certificate>>> {
        self.certificates
            .write()
            .map_err(|_| IdentityError::Store("certificate map lock poisoned".to_string()))
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn find(&self, kind: CertificateKind, predicates: &Predicates) -> IdentityResult<Vec<Certificate>> {
        for (field, value) in predicates {
            kind.check(*field, value)?;
        }
        let guard = self.read()?;
        Ok(guard
            .values()
            .filter(|certificate| kind.includes(certificate) && matches(certificate, predicates))
            .cloned()
            .collect())
    }
}
