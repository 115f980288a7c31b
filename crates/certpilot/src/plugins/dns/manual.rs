//! Manual DNS validation: the operator creates and deletes the TXT record

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use certpilot_common::ChallengeKind;
use certpilot_config::DnsConfig;

use super::wait_for_propagation;
use crate::challenge::ChallengeProof;
use crate::console::Console;
use crate::error::{ConfigurationError, PluginError};
use crate::plugins::{ValidationPlugin, MANUAL_DNS};
use crate::target::Target;

pub struct ManualDnsValidation {
    console: Arc<dyn Console>,
    dns: DnsConfig,
}

impl ManualDnsValidation {
    pub fn new(console: Arc<dyn Console>, dns: DnsConfig) -> Self {
        Self { console, dns }
    }
}

#[async_trait]
impl ValidationPlugin for ManualDnsValidation {
    fn name(&self) -> &str {
        MANUAL_DNS
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::Dns01
    }

    fn prepare(&self, _target: &Target) -> Result<(), ConfigurationError> {
        if self.console.is_interactive() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid(format!(
                "plugin '{}' needs an operator and cannot run unattended",
                MANUAL_DNS
            )))
        }
    }

    async fn publish_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        self.console.show(&format!("Domain:      {}", proof.identifier));
        self.console.show(&format!("Record:      {}", proof.location));
        self.console.show("Type:        TXT");
        self.console.show(&format!("Content:     \"{}\"", proof.content));
        self.console
            .show("Note 1:      Some DNS control panels add quotation marks automatically; only one set is needed.");

        if !self.console.confirm("Has the record been created?", true)? {
            return Err(PluginError::Declined(format!(
                "TXT record for {} was not created",
                proof.identifier
            )));
        }
        info!(record = %proof.location, "Operator created TXT record");

        wait_for_propagation(&proof.location, &proof.content, &self.dns).await;
        Ok(())
    }

    async fn retract_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        self.console.show(&format!(
            "The TXT record {} with content \"{}\" can now be deleted.",
            proof.location, proof.content
        ));
        self.console.confirm("Press enter to continue", true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{NonInteractive, ScriptedConsole};
    use certpilot_common::Identifier;

    fn no_check() -> DnsConfig {
        DnsConfig {
            propagation_check: false,
            propagation_attempts: 0,
        }
    }

    fn proof() -> ChallengeProof {
        ChallengeProof {
            identifier: Identifier::parse("example.com").unwrap(),
            kind: ChallengeKind::Dns01,
            location: "_acme-challenge.example.com".to_string(),
            token: "tok".to_string(),
            content: "digest".to_string(),
        }
    }

    #[tokio::test]
    async fn test_operator_confirms_record() {
        let console = Arc::new(ScriptedConsole::new(["y", ""]));
        let plugin = ManualDnsValidation::new(console.clone(), no_check());
        let target = Target::new("example.com", "Manual").with_validation(MANUAL_DNS);

        plugin.publish_proof(&target, &proof()).await.unwrap();
        plugin.retract_proof(&target, &proof()).await.unwrap();

        let transcript = console.transcript();
        assert!(transcript.contains(&"Record:      _acme-challenge.example.com".to_string()));
        assert!(transcript.contains(&"Content:     \"digest\"".to_string()));
        assert!(transcript.iter().any(|l| l.contains("can now be deleted")));
    }

    #[tokio::test]
    async fn test_operator_declines() {
        let console = Arc::new(ScriptedConsole::new(["n"]));
        let plugin = ManualDnsValidation::new(console, no_check());
        let target = Target::new("example.com", "Manual");

        let err = plugin.publish_proof(&target, &proof()).await.unwrap_err();
        assert!(matches!(err, PluginError::Declined(_)));
    }

    #[test]
    fn test_unattended_is_configuration_error() {
        let plugin = ManualDnsValidation::new(Arc::new(NonInteractive), no_check());
        assert!(plugin.prepare(&Target::new("example.com", "Manual")).is_err());
    }
}
