//! Certificate request targets
//!
//! A [`Target`] describes one certificate request: the primary host, its
//! alternative names, which plugins validate and install it, and which names
//! to leave out. Targets are snapshotted into the renewal schedule, so they
//! serialize on their own without referring back to live plugin objects.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use certpilot_common::{resolve_host_set, split_host_list, Identifier, MAX_NAMES};

use crate::error::ConfigurationError;

fn default_true() -> bool {
    true
}

/// One certificate request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Primary host, used as the subject common name
    pub host: String,
    /// Whether `host` is itself a DNS name to certify (false for site labels)
    #[serde(default = "default_true")]
    pub host_is_dns: bool,
    /// Web root or FTP URL where HTTP proofs are published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_root: Option<String>,
    /// Site identifier; comma-separated when several targets were merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    /// Names dropped from the request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_bindings: Vec<String>,
    #[serde(default)]
    pub alternative_names: Vec<String>,
    /// Installation plugin
    pub plugin: String,
    /// Validation plugin, when it differs from `plugin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    /// Underlying targets of a merged multi-site request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Target>,
}

impl Target {
    pub fn new(host: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            host_is_dns: true,
            web_root: None,
            site_id: None,
            exclude_bindings: Vec::new(),
            alternative_names: Vec::new(),
            plugin: plugin.into(),
            validation: None,
            members: Vec::new(),
        }
    }

    /// Build a target from a comma-separated host list
    ///
    /// The first name becomes the primary host and every name, the first
    /// included, becomes an alternative name.
    pub fn from_host_list(
        hosts: &str,
        web_root: Option<String>,
        plugin: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let mut names: Vec<String> = Vec::new();
        for name in split_host_list(hosts) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let host = names.first().cloned().ok_or(ConfigurationError::NoHosts)?;
        Ok(Self {
            web_root,
            alternative_names: names,
            ..Self::new(host, plugin)
        })
    }

    pub fn with_web_root(mut self, web_root: impl Into<String>) -> Self {
        self.web_root = Some(web_root.into());
        self
    }

    pub fn with_alternative_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternative_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclusions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_bindings = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn with_validation(mut self, plugin: impl Into<String>) -> Self {
        self.validation = Some(plugin.into());
        self
    }

    /// Name of the plugin that proves control of the identifiers
    pub fn validation_plugin(&self) -> &str {
        self.validation.as_deref().unwrap_or(&self.plugin)
    }

    /// The primary host as an identifier
    pub fn primary_identifier(&self) -> Result<Identifier, ConfigurationError> {
        Identifier::parse(&self.host).ok_or(ConfigurationError::NoHosts)
    }

    /// The deduplicated, normalized host set this target certifies
    ///
    /// Fails when no names remain after exclusions or when more than
    /// [`MAX_NAMES`] remain.
    pub fn resolved_hosts(&self) -> Result<Vec<Identifier>, ConfigurationError> {
        let primary = self.host_is_dns.then_some(self.host.as_str());
        let hosts = primary
            .into_iter()
            .chain(self.alternative_names.iter().map(String::as_str));
        let resolved = resolve_host_set(hosts, self.exclude_bindings.iter().map(String::as_str))?;
        Ok(resolved)
    }

    /// Targets an installation is dispatched to
    ///
    /// A merged target installs once per member, everything else installs
    /// once for itself.
    pub fn install_targets(&self) -> Vec<&Target> {
        if self.members.is_empty() {
            vec![self]
        } else {
            self.members.iter().collect()
        }
    }

    /// Combine several targets into one multi-site SAN request
    ///
    /// The first target supplies the primary host and plugins; the host sets
    /// are unioned. Returns [`ConfigurationError::TooManyHosts`] instead of
    /// truncating when the union exceeds [`MAX_NAMES`].
    pub fn merge(targets: &[Target]) -> Result<Target, ConfigurationError> {
        let first = targets.first().ok_or(ConfigurationError::NoHosts)?;

        let mut names: Vec<String> = Vec::new();
        let mut members = Vec::new();
        for target in targets {
            for id in target.resolved_hosts()? {
                let name = id.into_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            if target.members.is_empty() {
                members.push(target.clone());
            } else {
                members.extend(target.members.iter().cloned());
            }
        }

        if names.len() > MAX_NAMES {
            return Err(ConfigurationError::TooManyHosts {
                count: names.len(),
                max: MAX_NAMES,
            });
        }

        let site_ids: Vec<&str> = targets.iter().filter_map(|t| t.site_id.as_deref()).collect();
        let host = names.first().cloned().unwrap_or_else(|| first.host.clone());

        debug!(
            targets = targets.len(),
            hosts = names.len(),
            primary = %host,
            "Merged targets into one certificate request"
        );

        Ok(Target {
            host,
            host_is_dns: true,
            web_root: first.web_root.clone(),
            site_id: (!site_ids.is_empty()).then(|| site_ids.join(",")),
            exclude_bindings: Vec::new(),
            alternative_names: names,
            plugin: first.plugin.clone(),
            validation: first.validation.clone(),
            members,
        })
    }
}

/// `location` with any URL password masked, for logs and listings
pub fn redact_location(location: &str) -> Cow<'_, str> {
    match Url::parse(location) {
        Ok(mut url) if url.password().is_some() => match url.set_password(Some("***")) {
            Ok(()) => Cow::Owned(url.to_string()),
            Err(()) => Cow::Borrowed("<redacted>"),
        },
        _ => Cow::Borrowed(location),
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.plugin)?;
        if !self.alternative_names.contains(&self.host) {
            write!(f, "{} ", self.host)?;
        }
        if let Some(ref site) = self.site_id {
            write!(f, "(SiteId {}) ", site)?;
        }
        f.write_str("[")?;
        let count = self.alternative_names.len();
        if let Some(first) = self.alternative_names.first() {
            let plural = if count > 1 { "s" } else { "" };
            write!(f, "{} binding{} - {}", count, plural, first)?;
            if count > 1 {
                f.write_str(", ...")?;
            }
            f.write_str(" ")?;
        }
        if let Some(ref root) = self.web_root {
            write!(f, "@ {}", redact_location(root))?;
        }
        f.write_str("]")
    }
}
