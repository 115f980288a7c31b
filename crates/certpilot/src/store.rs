//! Certificate stores
//!
//! A store is a named place installed certificates live in. The directory
//! store keeps each certificate as a bundle file plus a metadata record:
//!
//! ```text
//! <config-path>/stores/<store-name>/
//! ├── 3F2A...9C.pem    # key + leaf + chain (0600)
//! └── 3F2A...9C.json   # thumbprint, friendly name, hosts, expiry
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use certpilot_common::fs::write_atomic;
use certpilot_common::Thumbprint;

use crate::certificate::CertificateArtifact;
use crate::error::StoreError;

/// A certificate held by a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCertificate {
    pub thumbprint: Thumbprint,
    pub friendly_name: String,
    pub hosts: Vec<String>,
    pub not_after: DateTime<Utc>,
    pub path: PathBuf,
}

impl StoredCertificate {
    pub fn covers(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}

pub trait CertificateStore: Send + Sync {
    fn name(&self) -> &str;

    /// Add a certificate; adding the same thumbprint again replaces it
    fn add(&self, artifact: &CertificateArtifact) -> Result<StoredCertificate, StoreError>;

    /// Remove by thumbprint; `false` when it was not present
    fn remove(&self, thumbprint: &Thumbprint) -> Result<bool, StoreError>;

    fn list(&self) -> Result<Vec<StoredCertificate>, StoreError>;

    /// Release the store once installation is done
    fn close(&self) {}
}

/// Store backed by a directory
#[derive(Debug, Clone)]
pub struct DirectoryCertificateStore {
    name: String,
    dir: PathBuf,
}

impl DirectoryCertificateStore {
    /// Open (creating if needed) the store `name` under `root`
    pub fn open(root: &Path, name: &str) -> Result<Self, StoreError> {
        let dir = root.join(name);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Open {
            name: name.to_string(),
            source,
        })?;
        debug!(store = %name, path = %dir.display(), "Opened certificate store");
        Ok(Self {
            name: name.to_string(),
            dir,
        })
    }

    /// Open `primary`, falling back to `fallback` once when it cannot be opened
    pub fn open_with_fallback(root: &Path, primary: &str, fallback: &str) -> Result<Self, StoreError> {
        match Self::open(root, primary) {
            Ok(store) => Ok(store),
            Err(err) => {
                warn!(
                    store = %primary,
                    fallback = %fallback,
                    error = %err,
                    "Certificate store unavailable, using fallback"
                );
                Self::open(root, fallback)
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bundle_path(&self, thumbprint: &Thumbprint) -> PathBuf {
        self.dir.join(format!("{}.pem", thumbprint))
    }

    fn metadata_path(&self, thumbprint: &Thumbprint) -> PathBuf {
        self.dir.join(format!("{}.json", thumbprint))
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            store: self.name.clone(),
            source,
        }
    }
}

impl CertificateStore for DirectoryCertificateStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, artifact: &CertificateArtifact) -> Result<StoredCertificate, StoreError> {
        let bundle = fs::read(artifact.bundle_path()).map_err(|e| self.io_error(e))?;
        let path = self.bundle_path(&artifact.thumbprint);
        write_atomic(&path, &bundle, Some(0o600)).map_err(|e| self.io_error(e))?;

        let stored = StoredCertificate {
            thumbprint: artifact.thumbprint.clone(),
            friendly_name: artifact.friendly_name.clone(),
            hosts: artifact.hosts.iter().map(|h| h.to_string()).collect(),
            not_after: artifact.not_after,
            path,
        };
        let metadata = serde_json::to_vec_pretty(&stored)?;
        write_atomic(&self.metadata_path(&artifact.thumbprint), &metadata, None)
            .map_err(|e| self.io_error(e))?;

        info!(
            store = %self.name,
            thumbprint = %stored.thumbprint,
            friendly_name = %stored.friendly_name,
            "Added certificate to store"
        );
        Ok(stored)
    }

    fn remove(&self, thumbprint: &Thumbprint) -> Result<bool, StoreError> {
        let mut removed = false;
        for path in [self.bundle_path(thumbprint), self.metadata_path(thumbprint)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }
        if removed {
            info!(store = %self.name, thumbprint = %thumbprint, "Removed certificate from store");
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<StoredCertificate>, StoreError> {
        let mut certificates = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| self.io_error(e))? {
            let path = entry.map_err(|e| self.io_error(e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| self.io_error(e))?;
            certificates.push(serde_json::from_str(&content)?);
        }
        certificates.sort_by(|a: &StoredCertificate, b| a.not_after.cmp(&b.not_after));
        Ok(certificates)
    }

    fn close(&self) {
        debug!(store = %self.name, "Closed certificate store");
    }
}

/// Remove certificates for `host` other than `keep`
///
/// Returns how many were removed.
pub fn remove_superseded(
    store: &dyn CertificateStore,
    host: &str,
    keep: &Thumbprint,
) -> Result<usize, StoreError> {
    let mut removed = 0;
    for cert in store.list()? {
        if &cert.thumbprint != keep && cert.covers(host) && store.remove(&cert.thumbprint)? {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(store = %store.name(), host = %host, removed, "Removed superseded certificates");
    }
    Ok(removed)
}
