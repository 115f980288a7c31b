//! Certificate authority contract
//!
//! The orchestrator and acquisition pipeline only talk to the authority
//! through [`AuthorityClient`], which keeps them testable against a scripted
//! authority and independent of the protocol client underneath.

use async_trait::async_trait;

use certpilot_common::{AuthorizationStatus, ChallengeKind, Identifier};

use crate::error::AuthorityError;

/// The challenge chosen for one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDetails {
    pub kind: ChallengeKind,
    /// Token naming the HTTP proof file
    pub token: String,
    /// Content to publish: the key authorization for HTTP-01, its digest for DNS-01
    pub proof_value: String,
    /// Authority URL used to report the proof as ready
    pub url: String,
}

/// Authorization progress for one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    /// Absent when the authority already considers the identifier valid
    pub challenge: Option<ChallengeDetails>,
}

impl AuthorizationState {
    pub fn is_pending(&self) -> bool {
        self.status == AuthorizationStatus::Pending
    }
}

/// Authority answer to a certificate signing request
#[derive(Debug, Clone, Default)]
pub struct CertificateResponse {
    /// HTTP-style status of the issuance request
    pub status: u16,
    /// Leaf certificate, DER
    pub certificate: Vec<u8>,
    /// Issuer chain delivered with the leaf, DER, nearest issuer first
    pub chain: Vec<Vec<u8>>,
    /// Where to fetch the issuer when `chain` is empty
    pub chain_link: Option<String>,
    /// Structured error payload on failure
    pub problem: Option<String>,
}

impl CertificateResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Operations the core needs from a certificate authority
///
/// One client drives one order at a time: [`begin_order`](Self::begin_order)
/// names the identifiers, each is authorized, then
/// [`request_certificate`](Self::request_certificate) finalizes it.
#[async_trait]
pub trait AuthorityClient: Send {
    /// Directory URL of the authority
    fn base_uri(&self) -> &str;

    /// Start a new order for `identifiers`
    async fn begin_order(&mut self, identifiers: &[Identifier]) -> Result<(), AuthorityError>;

    /// Fetch the authorization for `identifier` and pick a challenge of `kind`
    async fn authorize(
        &mut self,
        identifier: &Identifier,
        kind: ChallengeKind,
    ) -> Result<AuthorizationState, AuthorityError>;

    /// Tell the authority the proof is published
    async fn submit_challenge_answer(
        &mut self,
        state: &AuthorizationState,
    ) -> Result<(), AuthorityError>;

    /// Re-fetch the authorization status
    async fn refresh_authorization(
        &mut self,
        state: &AuthorizationState,
    ) -> Result<AuthorizationState, AuthorityError>;

    /// Submit a DER-encoded CSR and collect the issued certificate
    async fn request_certificate(
        &mut self,
        csr_der: &[u8],
    ) -> Result<CertificateResponse, AuthorityError>;

    /// Download the issuer certificate behind a chain link, as DER
    async fn download_issuer_certificate(&mut self, link: &str) -> Result<Vec<u8>, AuthorityError>;
}
