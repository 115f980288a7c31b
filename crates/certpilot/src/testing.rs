//! In-memory collaborators for unit tests

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateSigningRequestDer;
use tokio_util::sync::CancellationToken;

use certpilot_common::{AuthorizationStatus, ChallengeKind, Identifier};

use crate::acme::{AuthorityClient, AuthorizationState, CertificateResponse, ChallengeDetails};
use crate::certificate::CertificateArtifact;
use crate::challenge::ChallengeProof;
use crate::error::{AuthorityError, PluginError};
use crate::plugins::{InstallationPlugin, ValidationPlugin};
use crate::store::{CertificateStore, StoredCertificate};
use crate::target::Target;

enum ChainMode {
    Inline,
    Link(String),
    Missing,
}

/// Authority that follows a per-identifier script and signs whatever CSR it gets
pub(crate) struct ScriptedAuthority {
    tokens: HashMap<String, String>,
    initial: HashMap<String, AuthorizationStatus>,
    refreshes: HashMap<String, VecDeque<AuthorizationStatus>>,
    certificate_status: u16,
    chain: ChainMode,
    fail_submit: bool,
    cancel_on_submit: Option<CancellationToken>,
    observed: Option<Arc<Mutex<Vec<String>>>>,
    published_at_submit: Vec<Vec<String>>,
    events: Vec<String>,
    pub last_csr: Option<Vec<u8>>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            initial: HashMap::new(),
            refreshes: HashMap::new(),
            certificate_status: 200,
            chain: ChainMode::Inline,
            fail_submit: false,
            cancel_on_submit: None,
            observed: None,
            published_at_submit: Vec::new(),
            events: Vec::new(),
            last_csr: None,
        }
    }

    pub fn with_token(mut self, identifier: &str, token: &str) -> Self {
        self.tokens.insert(identifier.to_string(), token.to_string());
        self
    }

    pub fn with_initial_status(mut self, identifier: &str, status: AuthorizationStatus) -> Self {
        self.initial.insert(identifier.to_string(), status);
        self
    }

    /// Statuses returned by successive refreshes; pending once exhausted
    pub fn with_refreshes<I>(mut self, identifier: &str, statuses: I) -> Self
    where
        I: IntoIterator<Item = AuthorizationStatus>,
    {
        self.refreshes
            .insert(identifier.to_string(), statuses.into_iter().collect());
        self
    }

    pub fn with_certificate_status(mut self, status: u16) -> Self {
        self.certificate_status = status;
        self
    }

    pub fn with_chain_link(mut self, link: &str) -> Self {
        self.chain = ChainMode::Link(link.to_string());
        self
    }

    pub fn without_chain(mut self) -> Self {
        self.chain = ChainMode::Missing;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn cancel_on_submit(mut self, token: CancellationToken) -> Self {
        self.cancel_on_submit = Some(token);
        self
    }

    /// Snapshot `published` every time an answer is submitted
    pub fn observe_submissions(mut self, published: Arc<Mutex<Vec<String>>>) -> Self {
        self.observed = Some(published);
        self
    }

    pub fn published_at_submit(&self) -> Vec<Vec<String>> {
        self.published_at_submit.clone()
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    fn token_for(&self, identifier: &Identifier) -> String {
        self.tokens
            .get(identifier.as_str())
            .cloned()
            .unwrap_or_else(|| format!("token-{}", identifier.as_str().replace('*', "_")))
    }
}

fn test_issuer() -> Vec<u8> {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Test Issuer");
    params.distinguished_name = dn;
    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().der().to_vec()
}

/// Sign `csr_der` with a throwaway CA, keeping the requester's key and names
pub(crate) fn issue_for_csr(csr_der: &[u8]) -> Vec<u8> {
    let csr = rcgen::CertificateSigningRequestParams::from_der(&CertificateSigningRequestDer::from(csr_der))
        .unwrap();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Test Issuer");
    ca_params.distinguished_name = dn;
    let issuer = rcgen::Issuer::new(ca_params, KeyPair::generate().unwrap());

    csr.signed_by(&issuer).unwrap().der().to_vec()
}

#[async_trait]
impl AuthorityClient for ScriptedAuthority {
    fn base_uri(&self) -> &str {
        "https://ca.test/directory"
    }

    async fn begin_order(&mut self, identifiers: &[Identifier]) -> Result<(), AuthorityError> {
        let names: Vec<&str> = identifiers.iter().map(Identifier::as_str).collect();
        self.events.push(format!("order {}", names.join(",")));
        Ok(())
    }

    async fn authorize(
        &mut self,
        identifier: &Identifier,
        kind: ChallengeKind,
    ) -> Result<AuthorizationState, AuthorityError> {
        self.events.push(format!("authorize {}", identifier));
        let status = self
            .initial
            .get(identifier.as_str())
            .copied()
            .unwrap_or(AuthorizationStatus::Pending);
        let challenge = (status == AuthorizationStatus::Pending).then(|| {
            let token = self.token_for(identifier);
            let proof_value = match kind {
                ChallengeKind::Http01 => format!("{}.account-thumbprint", token),
                ChallengeKind::Dns01 => format!("dns-{}", token),
            };
            ChallengeDetails {
                kind,
                url: format!("https://ca.test/chall/{}", token),
                token,
                proof_value,
            }
        });
        Ok(AuthorizationState {
            identifier: identifier.clone(),
            status,
            challenge,
        })
    }

    async fn submit_challenge_answer(&mut self, state: &AuthorizationState) -> Result<(), AuthorityError> {
        self.events.push(format!("submit {}", state.identifier));
        if let Some(ref observed) = self.observed {
            self.published_at_submit.push(observed.lock().unwrap().clone());
        }
        if let Some(ref token) = self.cancel_on_submit {
            token.cancel();
        }
        if self.fail_submit {
            return Err(AuthorityError::Protocol("submission refused".to_string()));
        }
        Ok(())
    }

    async fn refresh_authorization(
        &mut self,
        state: &AuthorizationState,
    ) -> Result<AuthorizationState, AuthorityError> {
        self.events.push(format!("refresh {}", state.identifier));
        let status = self
            .refreshes
            .get_mut(state.identifier.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(state.status);
        Ok(AuthorizationState {
            status,
            ..state.clone()
        })
    }

    async fn request_certificate(&mut self, csr_der: &[u8]) -> Result<CertificateResponse, AuthorityError> {
        self.events.push("request".to_string());
        self.last_csr = Some(csr_der.to_vec());

        if !(200..300).contains(&self.certificate_status) {
            return Ok(CertificateResponse {
                status: self.certificate_status,
                problem: Some("urn:ietf:params:acme:error:badCSR".to_string()),
                ..Default::default()
            });
        }

        let certificate = issue_for_csr(csr_der);
        let (chain, chain_link) = match self.chain {
            ChainMode::Inline => (vec![test_issuer()], None),
            ChainMode::Link(ref link) => (Vec::new(), Some(link.clone())),
            ChainMode::Missing => (Vec::new(), None),
        };
        Ok(CertificateResponse {
            status: self.certificate_status,
            certificate,
            chain,
            chain_link,
            problem: None,
        })
    }

    async fn download_issuer_certificate(&mut self, link: &str) -> Result<Vec<u8>, AuthorityError> {
        self.events.push(format!("issuer {}", link));
        Ok(test_issuer())
    }
}

/// Validation plugin that tracks which proofs are currently published
pub(crate) struct RecordingValidation {
    kind: ChallengeKind,
    published: Arc<Mutex<Vec<String>>>,
    publishes: AtomicUsize,
    retracts: AtomicUsize,
    fail_publish: bool,
    fail_retract: bool,
}

impl RecordingValidation {
    pub fn new(kind: ChallengeKind) -> Self {
        Self {
            kind,
            published: Arc::new(Mutex::new(Vec::new())),
            publishes: AtomicUsize::new(0),
            retracts: AtomicUsize::new(0),
            fail_publish: false,
            fail_retract: false,
        }
    }

    pub fn http() -> Self {
        Self::new(ChallengeKind::Http01)
    }

    pub fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub fn failing_retract(mut self) -> Self {
        self.fail_retract = true;
        self
    }

    pub fn published(&self) -> Arc<Mutex<Vec<String>>> {
        self.published.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn retract_count(&self) -> usize {
        self.retracts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationPlugin for RecordingValidation {
    fn name(&self) -> &str {
        "Recording"
    }

    fn challenge_kind(&self) -> ChallengeKind {
        self.kind
    }

    async fn publish_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish {
            return Err(PluginError::Io(std::io::Error::other("web root is read-only")));
        }
        self.published.lock().unwrap().push(proof.location.clone());
        Ok(())
    }

    async fn retract_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        self.retracts.fetch_add(1, Ordering::SeqCst);
        if self.fail_retract {
            return Err(PluginError::Io(std::io::Error::other("permission denied")));
        }
        self.published.lock().unwrap().retain(|p| p != &proof.location);
        Ok(())
    }
}

/// Installation plugin that records calls
#[derive(Default)]
pub(crate) struct RecordingInstaller {
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl RecordingInstaller {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl InstallationPlugin for RecordingInstaller {
    fn name(&self) -> &str {
        "Recording"
    }

    async fn install(
        &self,
        target: &Target,
        _artifact: &CertificateArtifact,
        store: &dyn CertificateStore,
        stored: &StoredCertificate,
    ) -> Result<(), PluginError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("install {} {} {}", target.host, store.name(), stored.thumbprint));
        Ok(())
    }

    async fn install_central(&self, target: &Target, central_store: &Path) -> Result<(), PluginError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("central {} {}", target.host, central_store.display()));
        Ok(())
    }

    fn on_authorization_failed(&self, _target: &Target, identifier: &Identifier) {
        self.failures.lock().unwrap().push(identifier.to_string());
    }
}
