//! Validation and installation plugins
//!
//! A plugin implements one or both capabilities:
//!
//! - [`ValidationPlugin`] publishes and retracts challenge proofs
//! - [`InstallationPlugin`] puts an issued certificate to use
//!
//! The [`PluginRegistry`] maps plugin names to capabilities. It is built once
//! per process from a fixed table; lookup is by exact name.

pub mod dns;
pub mod ftp;
pub mod manual;
pub mod script;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use certpilot_common::{ChallengeKind, Identifier, Thumbprint};
use certpilot_config::Config;

use crate::certificate::CertificateArtifact;
use crate::challenge::ChallengeProof;
use crate::console::Console;
use crate::error::{ConfigurationError, PluginError};
use crate::store::{remove_superseded, CertificateStore, StoredCertificate};
use crate::target::Target;

pub use dns::azure::AzureDnsValidation;
pub use dns::manual::ManualDnsValidation;
pub use ftp::FtpPlugin;
pub use manual::ManualPlugin;
pub use script::ScriptInstaller;

/// Registered plugin names
pub const MANUAL: &str = "Manual";
pub const FTP: &str = "FTP";
pub const MANUAL_DNS: &str = "ManualDns";
pub const AZURE_DNS: &str = "AzureDns";

/// Proves control of identifiers by publishing challenge proofs
#[async_trait]
pub trait ValidationPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Challenge type requested from the authority
    fn challenge_kind(&self) -> ChallengeKind;

    /// Check that `target` carries everything this plugin needs
    fn prepare(&self, _target: &Target) -> Result<(), ConfigurationError> {
        Ok(())
    }

    async fn publish_proof(&self, target: &Target, proof: &ChallengeProof) -> Result<(), PluginError>;

    async fn retract_proof(&self, target: &Target, proof: &ChallengeProof) -> Result<(), PluginError>;
}

/// Puts issued certificates to use
#[async_trait]
pub trait InstallationPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Check that `target` carries everything this plugin needs
    fn prepare(&self, _target: &Target) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Install a certificate that was added to `store`
    async fn install(
        &self,
        target: &Target,
        artifact: &CertificateArtifact,
        store: &dyn CertificateStore,
        stored: &StoredCertificate,
    ) -> Result<(), PluginError>;

    /// Install after the bundle was copied into a centralized store
    async fn install_central(&self, target: &Target, central_store: &Path) -> Result<(), PluginError>;

    /// Remove certificates for the target's hosts other than `keep`
    fn uninstall(
        &self,
        target: &Target,
        store: &dyn CertificateStore,
        keep: &Thumbprint,
    ) -> Result<(), PluginError> {
        for host in target.resolved_hosts()? {
            remove_superseded(store, host.as_str(), keep)?;
        }
        Ok(())
    }

    /// Check that `target` can be renewed without an operator present
    fn renew(&self, _target: &Target) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Called when the authority declared `identifier` invalid
    fn on_authorization_failed(&self, target: &Target, identifier: &Identifier) {
        warn!(
            plugin = %self.name(),
            target = %target,
            domain = %identifier,
            "Authorization failed; check that the challenge proof is reachable by the authority"
        );
    }
}

/// What plugins may use from the running invocation
#[derive(Clone)]
pub struct PluginContext {
    pub config: Arc<Config>,
    pub console: Arc<dyn Console>,
}

impl PluginContext {
    pub fn new(config: Arc<Config>, console: Arc<dyn Console>) -> Self {
        Self { config, console }
    }
}

struct PluginEntry {
    name: String,
    validation: Option<Arc<dyn ValidationPlugin>>,
    installation: Option<Arc<dyn InstallationPlugin>>,
}

/// Name to capability table
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in plugin table
    pub fn builtin(ctx: &PluginContext) -> Self {
        let manual = Arc::new(ManualPlugin::new(ctx.config.clone()));
        let ftp = Arc::new(FtpPlugin::new(ctx.config.clone()));

        let mut registry = Self::new();
        registry.register(MANUAL, Some(manual.clone()), Some(manual));
        registry.register(FTP, Some(ftp.clone()), Some(ftp));
        registry.register(
            MANUAL_DNS,
            Some(Arc::new(ManualDnsValidation::new(ctx.console.clone(), ctx.config.dns.clone()))),
            None,
        );
        registry.register(
            AZURE_DNS,
            Some(Arc::new(AzureDnsValidation::new(
                ctx.config.azure_dns.clone(),
                ctx.config.dns.clone(),
            ))),
            None,
        );
        registry
    }

    /// Add or replace a table entry
    pub fn register(
        &mut self,
        name: &str,
        validation: Option<Arc<dyn ValidationPlugin>>,
        installation: Option<Arc<dyn InstallationPlugin>>,
    ) {
        self.entries.retain(|e| e.name != name);
        debug!(
            plugin = %name,
            validation = validation.is_some(),
            installation = installation.is_some(),
            "Registered plugin"
        );
        self.entries.push(PluginEntry {
            name: name.to_string(),
            validation,
            installation,
        });
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    fn entry(&self, name: &str) -> Result<&PluginEntry, ConfigurationError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ConfigurationError::UnknownPlugin(name.to_string()))
    }

    pub fn validation(&self, name: &str) -> Result<Arc<dyn ValidationPlugin>, ConfigurationError> {
        self.entry(name)?
            .validation
            .clone()
            .ok_or_else(|| ConfigurationError::NotAValidationPlugin(name.to_string()))
    }

    pub fn installation(&self, name: &str) -> Result<Arc<dyn InstallationPlugin>, ConfigurationError> {
        self.entry(name)?
            .installation
            .clone()
            .ok_or_else(|| ConfigurationError::NotAnInstallationPlugin(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::NonInteractive;

    fn registry() -> PluginRegistry {
        let ctx = PluginContext::new(Arc::new(Config::default()), Arc::new(NonInteractive));
        PluginRegistry::builtin(&ctx)
    }

    #[test]
    fn test_builtin_lookup() {
        let registry = registry();

        assert_eq!(registry.installation("FTP").unwrap().name(), FTP);
        let manual = registry.validation("Manual").unwrap();
        assert_eq!(manual.name(), MANUAL);
        assert_eq!(manual.challenge_kind(), ChallengeKind::Http01);
        assert_eq!(
            registry.validation("AzureDns").unwrap().challenge_kind(),
            ChallengeKind::Dns01
        );

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec![MANUAL, FTP, MANUAL_DNS, AZURE_DNS]);
    }

    #[test]
    fn test_unknown_and_missing_capabilities() {
        let registry = registry();

        assert!(matches!(
            registry.validation("Nope"),
            Err(ConfigurationError::UnknownPlugin(ref n)) if n == "Nope"
        ));
        assert!(matches!(
            registry.installation("ManualDns"),
            Err(ConfigurationError::NotAnInstallationPlugin(_))
        ));
        // Exact match only
        assert!(registry.validation("manual").is_err());
    }

    #[test]
    fn test_register_replaces_entry() {
        let mut registry = registry();
        registry.register(FTP, None, None);
        assert!(registry.installation(FTP).is_err());
        assert_eq!(registry.names().filter(|n| *n == FTP).count(), 1);
    }
}
