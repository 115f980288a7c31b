//! Authorization of identifiers
//!
//! Per identifier the orchestrator runs
//!
//! ```text
//! request ─► publish ─► submit ─► poll ─┬─► valid
//!               │                       ├─► invalid ─► diagnostics hook
//!               │                       ├─► timed out
//!               │                       └─► cancelled
//!               │           retract ◄───┘ (every exit after publish)
//!               └─ failure: abort, nothing to retract
//! ```
//!
//! The proof lives on the external surface only between publish and
//! retract. Retract failures are logged and never change the outcome.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certpilot_common::{AuthorizationStatus, ChallengeKind, Identifier};
use certpilot_config::PollConfig;

use crate::acme::{AuthorityClient, AuthorizationState, ChallengeDetails};
use crate::error::{CertPilotError, ConfigurationError};
use crate::plugins::{InstallationPlugin, ValidationPlugin};
use crate::target::{redact_location, Target};

/// HTTP-01 proof location under a web root
pub const HTTP_CHALLENGE_PATH: &str = ".well-known/acme-challenge";

/// DNS-01 record label prefix
pub const DNS_CHALLENGE_LABEL: &str = "_acme-challenge";

/// What a validation plugin publishes for one authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeProof {
    pub identifier: Identifier,
    pub kind: ChallengeKind,
    /// File path or URL for HTTP-01, record name for DNS-01
    pub location: String,
    pub token: String,
    /// File content or TXT record value
    pub content: String,
}

impl ChallengeProof {
    /// Derive the proof for `challenge` on `identifier`
    pub fn derive(
        target: &Target,
        identifier: &Identifier,
        challenge: &ChallengeDetails,
    ) -> Result<Self, ConfigurationError> {
        let location = match challenge.kind {
            ChallengeKind::Http01 => {
                let root = target.web_root.as_deref().ok_or_else(|| {
                    ConfigurationError::MissingParameter {
                        plugin: target.validation_plugin().to_string(),
                        parameter: "a web root",
                    }
                })?;
                http_proof_location(root, &challenge.token)
            }
            ChallengeKind::Dns01 => dns_record_name(identifier),
        };
        Ok(Self {
            identifier: identifier.clone(),
            kind: challenge.kind,
            location,
            token: challenge.token.clone(),
            content: challenge.proof_value.clone(),
        })
    }
}

/// `<web-root>/.well-known/acme-challenge/<token>`
pub fn http_proof_location(web_root: &str, token: &str) -> String {
    format!(
        "{}/{}/{}",
        web_root.trim_end_matches(['/', '\\']),
        HTTP_CHALLENGE_PATH,
        token
    )
}

/// `_acme-challenge.<identifier>`, wildcard label dropped
pub fn dns_record_name(identifier: &Identifier) -> String {
    let name = identifier.as_str();
    format!(
        "{}.{}",
        DNS_CHALLENGE_LABEL,
        name.strip_prefix("*.").unwrap_or(name)
    )
}

/// Terminal result of authorizing one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Valid,
    Invalid { identifier: Identifier },
    TimedOut { identifier: Identifier, attempts: u32 },
    Cancelled { identifier: Identifier },
}

impl AuthorizationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, AuthorizationOutcome::Valid)
    }
}

impl fmt::Display for AuthorizationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorizationOutcome::Valid => f.write_str("valid"),
            AuthorizationOutcome::Invalid { identifier } => {
                write!(f, "authorization for {} is invalid", identifier)
            }
            AuthorizationOutcome::TimedOut { identifier, attempts } => write!(
                f,
                "authorization for {} still pending after {} attempts",
                identifier, attempts
            ),
            AuthorizationOutcome::Cancelled { identifier } => {
                write!(f, "authorization for {} cancelled", identifier)
            }
        }
    }
}

enum PollResult {
    Terminal(AuthorizationStatus),
    TimedOut(u32),
    Cancelled,
}

/// Drives authorizations through a validation plugin
pub struct ChallengeOrchestrator<'a> {
    validation: &'a dyn ValidationPlugin,
    diagnostics: &'a dyn InstallationPlugin,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl<'a> ChallengeOrchestrator<'a> {
    pub fn new(
        validation: &'a dyn ValidationPlugin,
        diagnostics: &'a dyn InstallationPlugin,
        poll: PollConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            validation,
            diagnostics,
            poll,
            cancel,
        }
    }

    /// Authorize every resolved host of `target`, stopping at the first
    /// identifier that does not end up valid
    pub async fn authorize_all(
        &self,
        authority: &mut dyn AuthorityClient,
        target: &Target,
    ) -> Result<AuthorizationOutcome, CertPilotError> {
        for identifier in target.resolved_hosts()? {
            let outcome = self.authorize(authority, target, &identifier).await?;
            if !outcome.is_valid() {
                return Ok(outcome);
            }
        }
        Ok(AuthorizationOutcome::Valid)
    }

    /// Authorize one identifier
    pub async fn authorize(
        &self,
        authority: &mut dyn AuthorityClient,
        target: &Target,
        identifier: &Identifier,
    ) -> Result<AuthorizationOutcome, CertPilotError> {
        if self.cancel.is_cancelled() {
            return Ok(AuthorizationOutcome::Cancelled {
                identifier: identifier.clone(),
            });
        }

        let kind = self.validation.challenge_kind();
        info!(domain = %identifier, challenge = %kind, plugin = %self.validation.name(), "Authorizing");

        let state = authority.authorize(identifier, kind).await?;
        match state.status {
            AuthorizationStatus::Valid => {
                info!(domain = %identifier, "Authorization already valid");
                return Ok(AuthorizationOutcome::Valid);
            }
            AuthorizationStatus::Invalid => {
                return Ok(self.report_invalid(target, identifier));
            }
            AuthorizationStatus::Pending => {}
        }

        let challenge = state.challenge.as_ref().ok_or_else(|| {
            crate::error::AuthorityError::NoChallenge {
                identifier: identifier.to_string(),
                kind,
            }
        })?;
        let proof = ChallengeProof::derive(target, identifier, challenge)?;

        self.validation.publish_proof(target, &proof).await?;
        debug!(domain = %identifier, location = %redact_location(&proof.location), "Published proof");

        let result = self.submit_and_poll(authority, state).await;

        if let Err(err) = self.validation.retract_proof(target, &proof).await {
            warn!(
                domain = %identifier,
                location = %redact_location(&proof.location),
                error = %err,
                "Failed to retract challenge proof"
            );
        } else {
            debug!(domain = %identifier, location = %redact_location(&proof.location), "Retracted proof");
        }

        let outcome = match result? {
            PollResult::Terminal(AuthorizationStatus::Valid) => {
                info!(domain = %identifier, "Authorization valid");
                AuthorizationOutcome::Valid
            }
            PollResult::Terminal(_) => self.report_invalid(target, identifier),
            PollResult::TimedOut(attempts) => {
                warn!(domain = %identifier, attempts, "Authorization still pending, giving up");
                AuthorizationOutcome::TimedOut {
                    identifier: identifier.clone(),
                    attempts,
                }
            }
            PollResult::Cancelled => {
                warn!(domain = %identifier, "Authorization cancelled");
                AuthorizationOutcome::Cancelled {
                    identifier: identifier.clone(),
                }
            }
        };
        Ok(outcome)
    }

    fn report_invalid(&self, target: &Target, identifier: &Identifier) -> AuthorizationOutcome {
        warn!(domain = %identifier, "Authorization invalid");
        self.diagnostics.on_authorization_failed(target, identifier);
        AuthorizationOutcome::Invalid {
            identifier: identifier.clone(),
        }
    }

    async fn submit_and_poll(
        &self,
        authority: &mut dyn AuthorityClient,
        mut state: AuthorizationState,
    ) -> Result<PollResult, CertPilotError> {
        authority.submit_challenge_answer(&state).await?;

        for attempt in 1..=self.poll.max_attempts {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PollResult::Cancelled),
                _ = tokio::time::sleep(self.poll.interval) => {}
            }
            state = authority.refresh_authorization(&state).await?;
            debug!(domain = %state.identifier, attempt, status = %state.status, "Polled authorization");
            if state.status.is_terminal() {
                return Ok(PollResult::Terminal(state.status));
            }
        }
        Ok(PollResult::TimedOut(self.poll.max_attempts))
    }
}
