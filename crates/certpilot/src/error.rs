//! Error types
//!
//! One enum per concern. [`CertPilotError`] wraps them for callers that drive
//! a whole target through the authorize, acquire and install sequence.

use std::io;
use std::path::PathBuf;

use certpilot_common::{ChallengeKind, HostSetError};
use thiserror::Error;

use crate::challenge::AuthorizationOutcome;

/// Problems detectable before any network activity
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("plugin '{0}' cannot validate identifiers")]
    NotAValidationPlugin(String),

    #[error("plugin '{0}' cannot install certificates")]
    NotAnInstallationPlugin(String),

    #[error("plugin '{plugin}' requires {parameter}")]
    MissingParameter {
        plugin: String,
        parameter: &'static str,
    },

    #[error("no DNS identifiers found")]
    NoHosts,

    #[error("too many hosts for a single certificate: {count} (maximum {max})")]
    TooManyHosts { count: usize, max: usize },

    #[error("{0}")]
    Invalid(String),
}

impl From<HostSetError> for ConfigurationError {
    fn from(err: HostSetError) -> Self {
        match err {
            HostSetError::Empty => ConfigurationError::NoHosts,
            HostSetError::TooMany { count, max } => ConfigurationError::TooManyHosts { count, max },
        }
    }
}

/// Failures talking to the certificate authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority request failed: {0}")]
    Protocol(String),

    #[error("no {kind} challenge offered for {identifier}")]
    NoChallenge {
        identifier: String,
        kind: ChallengeKind,
    },

    #[error("authority returned no authorization for {0}")]
    UnknownIdentifier(String),

    #[error("no order in progress")]
    NoOrder,

    #[error("account error: {0}")]
    Account(String),

    #[error("HTTP request failed: {0}")]
    Http(String),
}

impl From<instant_acme::Error> for AuthorityError {
    fn from(err: instant_acme::Error) -> Self {
        AuthorityError::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for AuthorityError {
    fn from(err: reqwest::Error) -> Self {
        AuthorityError::Http(err.to_string())
    }
}

/// Failures turning an authorized target into a certificate
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("certificate request rejected with status {status}{}", problem_suffix(.problem))]
    Rejected { status: u16, problem: Option<String> },

    #[error("issuer certificate unavailable: {0}")]
    IssuerUnavailable(String),

    #[error("failed to generate certificate request: {0}")]
    Csr(#[from] rcgen::Error),

    #[error("authority returned an unusable certificate: {0}")]
    InvalidCertificate(String),

    #[error("failed to build PKCS#12 bundle: {0}")]
    Pkcs12(#[from] openssl::error::ErrorStack),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

fn problem_suffix(problem: &Option<String>) -> String {
    problem
        .as_deref()
        .map(|p| format!(": {}", p))
        .unwrap_or_default()
}

/// Failures raised by validation or installation plugins
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("operator declined: {0}")]
    Declined(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        PluginError::Http(err.to_string())
    }
}

/// Certificate store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open certificate store '{name}': {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("certificate store '{store}': {source}")]
    Io {
        store: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid certificate metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Renewal schedule persistence failures
#[derive(Debug, Error)]
pub enum RenewalStoreError {
    #[error("renewal schedule I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("renewal schedule is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Scheduler registration failures
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot determine the certpilot executable: {0}")]
    Executable(#[source] io::Error),
}

/// FTP client failures
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected reply {code}: {message}")]
    Reply { code: u16, message: String },

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid FTP URL '{0}'")]
    InvalidUrl(String),
}

/// Any failure while processing one target
#[derive(Debug, Error)]
pub enum CertPilotError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RenewalStore(#[from] RenewalStoreError),

    #[error("{0}")]
    Authorization(AuthorizationOutcome),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T, E = CertPilotError> = std::result::Result<T, E>;
