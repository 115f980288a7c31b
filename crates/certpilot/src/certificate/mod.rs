//! Certificate acquisition
//!
//! Turns an authorized target into a signed certificate bundle:
//!
//! 1. generate a key pair and a CSR (CN = primary host, SAN = every host)
//! 2. submit the CSR to the authority
//! 3. resolve the issuer chain, inline or through the chain link
//! 4. write every intermediate artifact, the PEM bundle and the PKCS#12
//!    archive
//!
//! A non-success response from the authority is fatal for the target. There
//! is no retry here; the next renewal cycle is the retry.

mod artifacts;

pub use artifacts::{build_pkcs12, ArtifactPaths, CertificateArtifact};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use certpilot_common::{Identifier, Thumbprint};

use crate::acme::AuthorityClient;
use crate::error::{AcquisitionError, CertPilotError};
use crate::target::Target;

use artifacts::write_artifact;

/// Freshly generated key and signing request
pub struct SigningRequest {
    pub key_pem: String,
    pub csr_der: Vec<u8>,
    pub csr_pem: String,
}

/// Build a CSR for `hosts`; the first host becomes the common name
pub fn build_csr(hosts: &[Identifier]) -> Result<SigningRequest, AcquisitionError> {
    let primary = hosts.first().ok_or_else(|| {
        AcquisitionError::InvalidCertificate("no hosts to put in the request".to_string())
    })?;

    let names: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
    let mut params = CertificateParams::new(names)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, primary.as_str());
    params.distinguished_name = dn;

    let key = KeyPair::generate()?;
    let csr = params.serialize_request(&key)?;

    Ok(SigningRequest {
        key_pem: key.serialize_pem(),
        csr_der: csr.der().to_vec(),
        csr_pem: csr.pem()?,
    })
}

/// Upper-case hex SHA-256 of a DER certificate
pub fn thumbprint(der: &[u8]) -> Thumbprint {
    Thumbprint::new(hex::encode(Sha256::digest(der)))
}

/// Validity window of a DER certificate
pub fn validity(der: &[u8]) -> Result<(DateTime<Utc>, DateTime<Utc>), AcquisitionError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| AcquisitionError::InvalidCertificate(e.to_string()))?;
    let to_utc = |ts: i64| {
        DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| AcquisitionError::InvalidCertificate(format!("timestamp {} out of range", ts)))
    };
    Ok((
        to_utc(cert.validity().not_before.timestamp())?,
        to_utc(cert.validity().not_after.timestamp())?,
    ))
}

fn to_pem(tag: &str, der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(tag, der.to_vec()))
}

/// Runs the acquisition steps for one target
#[derive(Debug, Clone)]
pub struct AcquisitionPipeline {
    output_dir: PathBuf,
    pfx_password: String,
}

impl AcquisitionPipeline {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pfx_password: String::new(),
        }
    }

    /// Password protecting the PKCS#12 archive (empty by default)
    pub fn with_pfx_password(mut self, password: impl Into<String>) -> Self {
        self.pfx_password = password.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Acquire a certificate for an authorized target
    pub async fn acquire(
        &self,
        authority: &mut dyn AuthorityClient,
        target: &Target,
    ) -> Result<CertificateArtifact, CertPilotError> {
        let hosts = target.resolved_hosts()?;
        let primary = hosts[0].clone();
        let paths = ArtifactPaths::new(&self.output_dir, primary.as_str());

        info!(domain = %primary, hosts = hosts.len(), "Requesting certificate");

        let request = build_csr(&hosts)?;
        write_artifact(&paths.key, request.key_pem.as_bytes(), true)?;
        write_artifact(&paths.csr_der, &request.csr_der, false)?;
        write_artifact(&paths.csr_pem, request.csr_pem.as_bytes(), false)?;
        debug!(domain = %primary, key = %paths.key.display(), "Wrote key and CSR");

        let response = authority.request_certificate(&request.csr_der).await?;
        if !response.is_success() {
            warn!(
                domain = %primary,
                status = response.status,
                problem = ?response.problem,
                "Authority rejected certificate request"
            );
            return Err(AcquisitionError::Rejected {
                status: response.status,
                problem: response.problem,
            }
            .into());
        }

        let chain = if !response.chain.is_empty() {
            response.chain
        } else if let Some(ref link) = response.chain_link {
            let issuer = authority
                .download_issuer_certificate(link)
                .await
                .map_err(|e| AcquisitionError::IssuerUnavailable(e.to_string()))?;
            vec![issuer]
        } else {
            return Err(AcquisitionError::IssuerUnavailable(
                "authority supplied neither a chain nor a chain link".to_string(),
            )
            .into());
        };

        let leaf = response.certificate;
        let (not_before, not_after) = validity(&leaf)?;
        let thumb = thumbprint(&leaf);

        let leaf_pem = to_pem("CERTIFICATE", &leaf);
        let chain_pem: String = chain.iter().map(|c| to_pem("CERTIFICATE", c)).collect();
        let bundle = format!("{}{}{}", request.key_pem, leaf_pem, chain_pem);
        let friendly_name = format!("{} {}", primary, not_before.format("%Y-%m-%d %H:%M:%S"));
        let pfx = build_pkcs12(&request.key_pem, &leaf, &chain, &friendly_name, &self.pfx_password)?;

        write_artifact(&paths.crt_der, &leaf, false)?;
        write_artifact(&paths.crt_pem, leaf_pem.as_bytes(), false)?;
        write_artifact(&paths.chain_pem, chain_pem.as_bytes(), false)?;
        write_artifact(&paths.bundle, bundle.as_bytes(), true)?;
        write_artifact(&paths.pfx, &pfx, true)?;

        info!(
            domain = %primary,
            thumbprint = %thumb,
            expires = %not_after,
            bundle = %paths.bundle.display(),
            "Certificate issued"
        );

        Ok(CertificateArtifact {
            friendly_name,
            primary,
            hosts,
            paths,
            thumbprint: thumb,
            not_before,
            not_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAuthority;
    use tempfile::TempDir;
    use x509_parser::prelude::*;

    fn ids(names: &[&str]) -> Vec<Identifier> {
        names.iter().filter_map(|n| Identifier::parse(n)).collect()
    }

    fn csr_names(der: &[u8]) -> (Option<String>, Vec<String>) {
        let (_, csr) = X509CertificationRequest::from_der(der).unwrap();
        let cn = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let mut sans = Vec::new();
        if let Some(extensions) = csr.requested_extensions() {
            for ext in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = ext {
                    for name in &san.general_names {
                        if let GeneralName::DNSName(dns) = name {
                            sans.push(dns.to_string());
                        }
                    }
                }
            }
        }
        (cn, sans)
    }

    #[test]
    fn test_csr_subject_and_alternative_names() {
        let target = Target::new("example.com", "Manual")
            .with_alternative_names(["example.com", "www.example.com"]);
        let hosts = target.resolved_hosts().unwrap();

        let request = build_csr(&hosts).unwrap();
        let (cn, mut sans) = csr_names(&request.csr_der);
        sans.sort();

        assert_eq!(cn.as_deref(), Some("example.com"));
        assert_eq!(sans, vec!["example.com", "www.example.com"]);
        assert!(request.key_pem.contains("PRIVATE KEY"));
        assert!(request.csr_pem.contains("CERTIFICATE REQUEST"));
    }

    #[test]
    fn test_csr_requires_hosts() {
        assert!(build_csr(&[]).is_err());
    }

    #[tokio::test]
    async fn test_acquire_writes_all_artifacts() {
        let dir = TempDir::new().unwrap();
        let pipeline = AcquisitionPipeline::new(dir.path());
        let mut authority = ScriptedAuthority::new();
        let target = Target::new("example.com", "Manual").with_alternative_names(["www.example.com"]);

        let artifact = pipeline.acquire(&mut authority, &target).await.unwrap();

        assert_eq!(artifact.primary.as_str(), "example.com");
        assert_eq!(artifact.hosts, ids(&["example.com", "www.example.com"]));
        for path in [
            &artifact.paths.key,
            &artifact.paths.csr_der,
            &artifact.paths.csr_pem,
            &artifact.paths.crt_der,
            &artifact.paths.crt_pem,
            &artifact.paths.chain_pem,
            &artifact.paths.bundle,
            &artifact.paths.pfx,
        ] {
            assert!(path.exists(), "missing {}", path.display());
        }

        let bundle = std::fs::read_to_string(artifact.bundle_path()).unwrap();
        let blocks = ::pem::parse_many(&bundle).unwrap();
        let tags: Vec<&str> = blocks.iter().map(|b| b.tag()).collect();
        assert_eq!(tags, vec!["PRIVATE KEY", "CERTIFICATE", "CERTIFICATE"]);

        let leaf = std::fs::read(&artifact.paths.crt_der).unwrap();
        assert_eq!(artifact.thumbprint, thumbprint(&leaf));
        assert!(artifact.not_after > artifact.not_before);
        assert!(artifact.friendly_name.starts_with("example.com "));

        // The authority saw the CSR that was written to disk
        let csr = std::fs::read(&artifact.paths.csr_der).unwrap();
        assert_eq!(authority.last_csr.as_deref(), Some(csr.as_slice()));
    }

    #[tokio::test]
    async fn test_pfx_carries_key_leaf_and_chain() {
        use openssl::pkcs12::Pkcs12;
        use openssl::pkey::PKey;

        let dir = TempDir::new().unwrap();
        let pipeline = AcquisitionPipeline::new(dir.path()).with_pfx_password("hunter2");
        let mut authority = ScriptedAuthority::new();
        let target = Target::new("example.com", "Manual").with_alternative_names(["www.example.com"]);

        let artifact = pipeline.acquire(&mut authority, &target).await.unwrap();

        let der = std::fs::read(artifact.pfx_path()).unwrap();
        let archive = Pkcs12::from_der(&der).unwrap();
        assert!(archive.parse2("wrong").is_err());
        let parsed = archive.parse2("hunter2").unwrap();

        let leaf = parsed.cert.unwrap();
        assert_eq!(leaf.to_der().unwrap(), std::fs::read(&artifact.paths.crt_der).unwrap());

        let key_pem = std::fs::read(&artifact.paths.key).unwrap();
        let key = PKey::private_key_from_pem(&key_pem).unwrap();
        assert!(parsed.pkey.unwrap().public_eq(&key));

        let chain = parsed.ca.unwrap();
        assert_eq!(chain.len(), 1);
        let chain_pem = std::fs::read_to_string(&artifact.paths.chain_pem).unwrap();
        let expected = ::pem::parse(chain_pem).unwrap();
        assert_eq!(chain.get(0).unwrap().to_der().unwrap(), expected.contents());
    }

    #[test]
    fn test_pkcs12_rejects_foreign_key() {
        let hosts = vec![Identifier::parse("example.com").unwrap()];
        let request = build_csr(&hosts).unwrap();
        let other = build_csr(&hosts).unwrap();
        let leaf = crate::testing::issue_for_csr(&other.csr_der);

        assert!(matches!(
            build_pkcs12(&request.key_pem, &leaf, &[], "example.com", ""),
            Err(AcquisitionError::Pkcs12(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_follows_chain_link() {
        let dir = TempDir::new().unwrap();
        let pipeline = AcquisitionPipeline::new(dir.path());
        let mut authority = ScriptedAuthority::new().with_chain_link("https://ca.test/issuer");
        let target = Target::new("example.com", "Manual");

        pipeline.acquire(&mut authority, &target).await.unwrap();
        assert!(authority.events().contains(&"issuer https://ca.test/issuer".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_request_is_fatal_and_keeps_key() {
        let dir = TempDir::new().unwrap();
        let pipeline = AcquisitionPipeline::new(dir.path());
        let mut authority = ScriptedAuthority::new().with_certificate_status(400);
        let target = Target::new("example.com", "Manual");

        let err = pipeline.acquire(&mut authority, &target).await.unwrap_err();
        assert!(matches!(
            err,
            CertPilotError::Acquisition(AcquisitionError::Rejected { status: 400, .. })
        ));

        let paths = ArtifactPaths::new(dir.path(), "example.com");
        assert!(paths.key.exists());
        assert!(!paths.bundle.exists());
    }

    #[tokio::test]
    async fn test_missing_chain_is_issuer_unavailable() {
        let dir = TempDir::new().unwrap();
        let pipeline = AcquisitionPipeline::new(dir.path());
        let mut authority = ScriptedAuthority::new().without_chain();
        let target = Target::new("example.com", "Manual");

        let err = pipeline.acquire(&mut authority, &target).await.unwrap_err();
        assert!(matches!(
            err,
            CertPilotError::Acquisition(AcquisitionError::IssuerUnavailable(_))
        ));
    }
}
