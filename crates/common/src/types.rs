//! Protocol vocabulary shared by the orchestrator, plugins and configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Challenge type a validation plugin can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// File served at `/.well-known/acme-challenge/<token>`
    #[serde(rename = "http-01")]
    Http01,
    /// TXT record at `_acme-challenge.<identifier>`
    #[serde(rename = "dns-01")]
    Dns01,
}

impl ChallengeKind {
    /// Wire tag used by the authority
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http-01" | "http" => Ok(ChallengeKind::Http01),
            "dns-01" | "dns" => Ok(ChallengeKind::Dns01),
            other => Err(format!("unknown challenge type '{}'", other)),
        }
    }
}

/// Status of one identifier authorization.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
}

impl AuthorizationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthorizationStatus::Pending)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}
