//! Per-identifier artifact files
//!
//! ```text
//! <cert-out-path>/
//! ├── example.com-key.pem     # private key (0600)
//! ├── example.com-csr.der
//! ├── example.com-csr.pem
//! ├── example.com-crt.der
//! ├── example.com-crt.pem
//! ├── example.com-chain.pem   # issuer chain
//! ├── example.com-all.pem     # bundle: key + leaf + chain (0600)
//! └── example.com-all.pfx     # the same as a PKCS#12 archive (0600)
//! ```
//!
//! Files are replaced whole on re-issuance, never edited in place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;

use certpilot_common::fs::write_atomic;
use certpilot_common::{clean_file_name, Identifier, Thumbprint};

use crate::error::AcquisitionError;

/// Deterministic artifact locations for one primary identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub key: PathBuf,
    pub csr_der: PathBuf,
    pub csr_pem: PathBuf,
    pub crt_der: PathBuf,
    pub crt_pem: PathBuf,
    pub chain_pem: PathBuf,
    pub bundle: PathBuf,
    pub pfx: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path, primary: &str) -> Self {
        let id = clean_file_name(primary);
        let file = |suffix: &str| dir.join(format!("{}-{}", id, suffix));
        Self {
            key: file("key.pem"),
            csr_der: file("csr.der"),
            csr_pem: file("csr.pem"),
            crt_der: file("crt.der"),
            crt_pem: file("crt.pem"),
            chain_pem: file("chain.pem"),
            bundle: file("all.pem"),
            pfx: file("all.pfx"),
        }
    }
}

/// An issued certificate and where its files live
#[derive(Debug, Clone)]
pub struct CertificateArtifact {
    pub primary: Identifier,
    pub hosts: Vec<Identifier>,
    pub paths: ArtifactPaths,
    pub thumbprint: Thumbprint,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub friendly_name: String,
}

impl CertificateArtifact {
    pub fn bundle_path(&self) -> &Path {
        &self.paths.bundle
    }

    pub fn pfx_path(&self) -> &Path {
        &self.paths.pfx
    }
}

/// Pack key, leaf and chain into a PKCS#12 archive
///
/// OpenSSL refuses a key that does not belong to the leaf.
pub fn build_pkcs12(
    key_pem: &str,
    leaf_der: &[u8],
    chain: &[Vec<u8>],
    friendly_name: &str,
    password: &str,
) -> Result<Vec<u8>, AcquisitionError> {
    let key = PKey::private_key_from_pem(key_pem.as_bytes())?;
    let leaf = X509::from_der(leaf_der)?;
    let mut ca = Stack::new()?;
    for der in chain {
        ca.push(X509::from_der(der)?)?;
    }

    let mut builder = Pkcs12::builder();
    builder.name(friendly_name).pkey(&key).cert(&leaf).ca(ca);
    let archive = builder.build2(password)?;
    Ok(archive.to_der()?)
}

/// Write one artifact file, private ones with owner-only permissions
pub(crate) fn write_artifact(path: &Path, contents: &[u8], private: bool) -> Result<(), AcquisitionError> {
    let mode = private.then_some(0o600);
    write_atomic(path, contents, mode).map_err(|source| AcquisitionError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_keyed_on_cleaned_identifier() {
        let paths = ArtifactPaths::new(Path::new("/certs"), "*.example.com");
        assert_eq!(paths.key, PathBuf::from("/certs/_.example.com-key.pem"));
        assert_eq!(paths.bundle, PathBuf::from("/certs/_.example.com-all.pem"));
        assert_eq!(paths.chain_pem, PathBuf::from("/certs/_.example.com-chain.pem"));
        assert_eq!(paths.pfx, PathBuf::from("/certs/_.example.com-all.pfx"));
    }
}
