//! Type-safe identifier newtypes.
//!
//! These keep DNS identifiers and certificate thumbprints from being mixed
//! up with arbitrary strings (e.g. passing a store name where a thumbprint
//! is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A DNS identifier being proven and certified.
///
/// Always stored trimmed and lower-cased so that two spellings of the same
/// host compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Normalize a raw host name into an identifier.
    ///
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().trim_end_matches('.').to_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether this is a wildcard identifier (`*.example.com`)
    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with("*.")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Certificate thumbprint (upper-case hex digest of the DER encoding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thumbprint(String);

impl Thumbprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_normalization() {
        let id = Identifier::parse("  WWW.Example.COM. ").unwrap();
        assert_eq!(id.as_str(), "www.example.com");
        assert_eq!(id.to_string(), "www.example.com");
    }

    #[test]
    fn test_identifier_blank() {
        assert!(Identifier::parse("").is_none());
        assert!(Identifier::parse("   ").is_none());
    }

    #[test]
    fn test_identifier_wildcard() {
        assert!(Identifier::parse("*.example.com").unwrap().is_wildcard());
        assert!(!Identifier::parse("example.com").unwrap().is_wildcard());
    }

    #[test]
    fn test_thumbprint_upper_case() {
        let thumb = Thumbprint::new("ab12cd");
        assert_eq!(thumb.as_str(), "AB12CD");
    }

    #[test]
    fn test_identifier_serde_transparent() {
        let id = Identifier::parse("example.com").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"example.com\"");
    }
}
