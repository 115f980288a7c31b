//! Issuance sequence and process modes
//!
//! [`Runner`] takes a target through authorize, acquire and install, then
//! records the next renewal. The three process modes build on it:
//!
//! - [`Runner::issue_interactive`] asks the operator for a target
//! - [`Runner::issue_unattended`] builds targets from configuration, merging
//!   host groups into one certificate when asked
//! - [`Runner::renew_due`] re-runs every due entry of the renewal schedule
//!
//! Plugins are resolved and checked before the authority is contacted.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certpilot_common::{split_host_list, Thumbprint};
use certpilot_config::Config;

use crate::acme::AuthorityClient;
use crate::certificate::AcquisitionPipeline;
use crate::challenge::{AuthorizationOutcome, ChallengeOrchestrator};
use crate::console::Console;
use crate::error::{CertPilotError, ConfigurationError, PluginError};
use crate::install::install_certificate;
use crate::plugins::{
    InstallationPlugin, PluginRegistry, ValidationPlugin, AZURE_DNS, FTP, MANUAL, MANUAL_DNS,
};
use crate::renewal::{check_renewals, RenewalDriver, RenewalStore, RenewalSummary, ScheduledRenewal};
use crate::target::Target;

/// How a target run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Installed { bundle: PathBuf, thumbprint: Thumbprint },
    AuthorizationFailed(AuthorizationOutcome),
}

impl RunOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, RunOutcome::Installed { .. })
    }
}

/// What a batch of unattended requests did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

/// Plugins resolved for one target
struct Plugins {
    validation: Arc<dyn ValidationPlugin>,
    installation: Arc<dyn InstallationPlugin>,
}

pub struct Runner {
    config: Arc<Config>,
    registry: PluginRegistry,
    console: Arc<dyn Console>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        config: Arc<Config>,
        registry: PluginRegistry,
        console: Arc<dyn Console>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            console,
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Resolve and check the plugins and host set of `target`
    fn plugins_for(&self, target: &Target) -> Result<Plugins, ConfigurationError> {
        let validation = self.registry.validation(target.validation_plugin())?;
        let installation = self.registry.installation(&target.plugin)?;
        target.resolved_hosts()?;
        validation.prepare(target)?;
        installation.prepare(target)?;
        Ok(Plugins {
            validation,
            installation,
        })
    }

    /// Authorize, acquire and install one target
    ///
    /// An identifier that does not end up valid stops the run with
    /// [`RunOutcome::AuthorizationFailed`]; cancellation is an error so batch
    /// callers stop too.
    pub async fn run_target(
        &self,
        authority: &mut dyn AuthorityClient,
        target: &Target,
    ) -> Result<RunOutcome, CertPilotError> {
        let plugins = self.plugins_for(target)?;
        let hosts = target.resolved_hosts()?;
        info!(target = %target, hosts = hosts.len(), "Processing target");

        authority.begin_order(&hosts).await?;

        let orchestrator = ChallengeOrchestrator::new(
            plugins.validation.as_ref(),
            plugins.installation.as_ref(),
            self.config.poll.clone(),
            self.cancel.clone(),
        );
        let outcome = orchestrator.authorize_all(authority, target).await?;
        match outcome {
            AuthorizationOutcome::Valid => {}
            AuthorizationOutcome::Cancelled { .. } => return Err(CertPilotError::Cancelled),
            failed => {
                warn!(target = %target, outcome = %failed, "Authorization failed");
                return Ok(RunOutcome::AuthorizationFailed(failed));
            }
        }

        let pipeline = AcquisitionPipeline::new(&self.config.cert_out_path)
            .with_pfx_password(self.config.pfx_password.as_str());
        let artifact = pipeline.acquire(authority, target).await?;

        install_certificate(&self.config, plugins.installation.as_ref(), target, &artifact).await?;

        Ok(RunOutcome::Installed {
            bundle: artifact.paths.bundle.clone(),
            thumbprint: artifact.thumbprint.clone(),
        })
    }

    /// Run `target` and, when installed and `schedule` is set, record its renewal
    pub async fn issue(
        &self,
        authority: &mut dyn AuthorityClient,
        target: &Target,
        schedule: bool,
    ) -> Result<RunOutcome, CertPilotError> {
        let outcome = self.run_target(authority, target).await?;
        if outcome.is_installed() && schedule {
            self.schedule_renewal(target)?;
        }
        Ok(outcome)
    }

    fn schedule_renewal(&self, target: &Target) -> Result<(), CertPilotError> {
        let mut store = RenewalStore::load(self.config.renewals_path())?;
        let due = Utc::now() + chrono::Duration::days(i64::from(self.config.renewal_days));
        store.upsert(ScheduledRenewal::new(target.clone(), due))?;
        Ok(())
    }

    /// Requests described by the ad-hoc options of the configuration
    ///
    /// Each `--host` group becomes one target. With `san` every group goes
    /// into a single request and is merged into one certificate; otherwise
    /// each group is a request of its own.
    pub fn unattended_requests(&self) -> Result<Vec<Vec<Target>>, ConfigurationError> {
        let plugin = self.config.plugin.as_deref().unwrap_or(MANUAL);
        if self.config.manual_hosts.is_empty() {
            return Err(ConfigurationError::MissingParameter {
                plugin: plugin.to_string(),
                parameter: "a host list (--host)",
            });
        }

        let mut targets = Vec::with_capacity(self.config.manual_hosts.len());
        for hosts in &self.config.manual_hosts {
            let mut target = Target::from_host_list(hosts, self.config.web_root.clone(), plugin)?;
            if let Some(ref validation) = self.config.validation {
                target = target.with_validation(validation.clone());
            }
            targets.push(target);
        }

        if self.config.san {
            Ok(vec![targets])
        } else {
            Ok(targets.into_iter().map(|t| vec![t]).collect())
        }
    }

    /// Issue every ad-hoc request without prompting
    ///
    /// Renewal is scheduled unless running against the test authority.
    pub async fn issue_unattended(
        &self,
        authority: &mut dyn AuthorityClient,
    ) -> Result<BatchSummary, CertPilotError> {
        let requests = self.unattended_requests()?;
        self.issue_batch(authority, &requests, !self.config.test).await
    }

    /// Issue one certificate per request, merging multi-target requests
    ///
    /// A request that fails, including one whose merged host set is too
    /// large, is logged and the batch goes on with the next. Cancellation
    /// stops the batch.
    pub async fn issue_batch(
        &self,
        authority: &mut dyn AuthorityClient,
        requests: &[Vec<Target>],
        schedule: bool,
    ) -> Result<BatchSummary, CertPilotError> {
        let mut summary = BatchSummary::default();
        for request in requests {
            let label = request.first().map(|t| t.host.clone()).unwrap_or_default();
            let result = match request.as_slice() {
                [single] => self.issue(authority, single, schedule).await,
                targets => match Target::merge(targets) {
                    Ok(merged) => self.issue(authority, &merged, schedule).await,
                    Err(e) => Err(e.into()),
                },
            };
            match result {
                Ok(RunOutcome::Installed { bundle, thumbprint }) => {
                    info!(host = %label, bundle = %bundle.display(), thumbprint = %thumbprint, "Certificate installed");
                    summary.installed.push(label);
                }
                Ok(RunOutcome::AuthorizationFailed(outcome)) => {
                    error!(host = %label, outcome = %outcome, "Request failed");
                    summary.failed.push(label);
                }
                Err(CertPilotError::Cancelled) => {
                    info!(host = %label, "Issuance cancelled");
                    summary.failed.push(label);
                    break;
                }
                Err(e) => {
                    error!(host = %label, error = %e, "Request failed");
                    summary.failed.push(label);
                }
            }
        }
        Ok(summary)
    }

    /// Ask the operator for a target and issue it
    ///
    /// Returns `None` when the operator quits the menu.
    pub async fn issue_interactive(
        &self,
        authority: &mut dyn AuthorityClient,
    ) -> Result<Option<RunOutcome>, CertPilotError> {
        let target = match self.choose_target()? {
            Some(target) => target,
            None => return Ok(None),
        };

        let outcome = self.run_target(authority, &target).await?;
        if outcome.is_installed() {
            let schedule = !self.config.test
                || self
                    .console
                    .confirm("Do you want to automatically renew this certificate in test mode?", false)
                    .map_err(PluginError::Io)?;
            if schedule {
                self.schedule_renewal(&target)?;
            }
        }
        Ok(Some(outcome))
    }

    fn choose_target(&self) -> Result<Option<Target>, CertPilotError> {
        let console = self.console.as_ref();
        console.show("M: Manual HTTP validation, web root on this machine");
        console.show("F: HTTP validation through FTP/FTPS");
        console.show("D: Manual DNS validation");
        console.show("Z: Azure DNS validation");
        console.show("Q: Quit");

        let choice = console.prompt("Choose an option").map_err(PluginError::Io)?;
        let (plugin, validation, web_root_question) = match choice.trim().to_uppercase().as_str() {
            "M" => (MANUAL, None, Some("Enter the web root path")),
            "F" => (FTP, None, Some("Enter the FTP path of the web root (ftp://host/path)")),
            "D" => (MANUAL, Some(MANUAL_DNS), None),
            "Z" => (MANUAL, Some(AZURE_DNS), None),
            "Q" | "" => return Ok(None),
            other => {
                return Err(ConfigurationError::Invalid(format!("unknown menu option '{}'", other)).into())
            }
        };

        let question = if self.config.san {
            "Enter host names, comma separated"
        } else {
            "Enter a host name"
        };
        let hosts = console.prompt(question).map_err(PluginError::Io)?;
        if !self.config.san && split_host_list(&hosts).len() > 1 {
            return Err(ConfigurationError::Invalid(
                "several host names need the subject alternative names option (--san)".to_string(),
            )
            .into());
        }

        let web_root = match web_root_question {
            Some(question) => Some(console.prompt(question).map_err(PluginError::Io)?),
            None => None,
        };

        let mut target = Target::from_host_list(&hosts, web_root, plugin)?;
        if let Some(validation) = validation {
            target = target.with_validation(validation);
        }
        debug!(target = %target, "Operator chose target");
        Ok(Some(target))
    }

    /// Renew every due entry in the renewal schedule
    pub async fn renew_due(
        &self,
        authority: &mut dyn AuthorityClient,
    ) -> Result<RenewalSummary, CertPilotError> {
        let mut store = RenewalStore::load(self.config.renewals_path())?;
        let mut driver = ScheduledRun {
            runner: self,
            authority,
        };
        let summary = check_renewals(
            &mut store,
            &mut driver,
            Utc::now(),
            self.config.renewal_period(),
            self.config.force_renewal,
        )
        .await?;
        info!(
            renewed = summary.renewed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped,
            "Renewal check finished"
        );
        Ok(summary)
    }
}

/// Renewal driver that re-runs targets through a [`Runner`]
struct ScheduledRun<'a> {
    runner: &'a Runner,
    authority: &'a mut dyn AuthorityClient,
}

#[async_trait]
impl RenewalDriver for ScheduledRun<'_> {
    async fn renew(&mut self, target: &Target) -> Result<(), CertPilotError> {
        self.runner.registry.installation(&target.plugin)?.renew(target)?;
        match self.runner.run_target(&mut *self.authority, target).await? {
            RunOutcome::Installed { .. } => Ok(()),
            RunOutcome::AuthorizationFailed(outcome) => Err(CertPilotError::Authorization(outcome)),
        }
    }
}
