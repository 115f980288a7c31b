//! FTP plugin
//!
//! Validates by uploading the HTTP-01 proof to an `ftp://` or `ftps://` web
//! root and installs through the post-install script. Credentials come from
//! configuration, or from the web root URL itself.

pub mod client;
#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use certpilot_common::ChallengeKind;
use certpilot_config::Config;

use super::manual::WEB_CONFIG_TEMPLATE;
use super::script::ScriptInstaller;
use super::{InstallationPlugin, ValidationPlugin, FTP};
use crate::certificate::CertificateArtifact;
use crate::challenge::ChallengeProof;
use crate::error::{ConfigurationError, FtpError, PluginError};
use crate::store::{CertificateStore, StoredCertificate};
use crate::target::Target;

pub use client::{FtpClient, FtpLocation};

pub struct FtpPlugin {
    config: Arc<Config>,
    script: ScriptInstaller,
}

impl FtpPlugin {
    pub fn new(config: Arc<Config>) -> Self {
        let script = ScriptInstaller::new(config.script.clone(), config.script_parameters.clone());
        Self { config, script }
    }

    fn credentials(&self, location: &FtpLocation) -> Result<(String, String), ConfigurationError> {
        if let Some(ref ftp) = self.config.ftp {
            return Ok((ftp.username.clone(), ftp.password.clone()));
        }
        match (&location.username, &location.password) {
            (Some(user), Some(password)) => Ok((user.clone(), password.clone())),
            _ => Err(ConfigurationError::MissingParameter {
                plugin: FTP.to_string(),
                parameter: "FTP credentials",
            }),
        }
    }

    fn web_root_location(target: &Target) -> Result<FtpLocation, ConfigurationError> {
        let root = target.web_root.as_deref().ok_or(ConfigurationError::MissingParameter {
            plugin: FTP.to_string(),
            parameter: "an FTP web root",
        })?;
        FtpLocation::parse(root).map_err(|e| ConfigurationError::Invalid(e.to_string()))
    }

    async fn session(&self, location: &FtpLocation) -> Result<FtpClient, PluginError> {
        let (username, password) = self.credentials(location)?;
        let mut client = FtpClient::open(location).await?;
        client.login(&username, &password).await?;
        Ok(client)
    }

    /// Remove `dir` when the listing shows it empty
    async fn remove_if_empty(client: &mut FtpClient, dir: &str) -> Result<bool, FtpError> {
        if !client.list_names(dir).await?.is_empty() {
            return Ok(false);
        }
        client.rmdir(dir).await?;
        Ok(true)
    }
}

#[async_trait]
impl ValidationPlugin for FtpPlugin {
    fn name(&self) -> &str {
        FTP
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::Http01
    }

    fn prepare(&self, target: &Target) -> Result<(), ConfigurationError> {
        let location = Self::web_root_location(target)?;
        self.credentials(&location)?;
        Ok(())
    }

    async fn publish_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        let location = FtpLocation::parse(&proof.location)?;
        let mut client = self.session(&location).await?;

        let dir = location.parent().to_string();
        client.mkdir_all(&dir).await?;
        client.put(&location.path, proof.content.as_bytes()).await?;
        info!(host = %location.host, path = %location.path, "Uploaded challenge proof");

        let template = self.config.config_path.join(WEB_CONFIG_TEMPLATE);
        if let Ok(content) = tokio::fs::read(&template).await {
            client.put(&format!("{}/web.config", dir), &content).await?;
            debug!(dir = %dir, "Uploaded web.config");
        }

        client.quit().await?;
        Ok(())
    }

    async fn retract_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        let location = FtpLocation::parse(&proof.location)?;
        let mut client = self.session(&location).await?;

        client.delete(&location.path).await?;
        debug!(host = %location.host, path = %location.path, "Deleted challenge proof");

        if self.config.cleanup_folders {
            let dir = location.parent().to_string();
            if let Err(err) = client.delete(&format!("{}/web.config", dir)).await {
                debug!(error = %err, "No web.config to delete");
            }
            if Self::remove_if_empty(&mut client, &dir).await? {
                let well_known = dir.rsplit_once('/').map(|(p, _)| p).unwrap_or_default();
                if well_known.ends_with("/.well-known") {
                    Self::remove_if_empty(&mut client, well_known).await?;
                }
                debug!(dir = %dir, "Removed empty challenge folders");
            }
        }

        if let Err(err) = client.quit().await {
            warn!(host = %location.host, error = %err, "FTP session did not close cleanly");
        }
        Ok(())
    }
}

#[async_trait]
impl InstallationPlugin for FtpPlugin {
    fn name(&self) -> &str {
        FTP
    }

    async fn install(
        &self,
        target: &Target,
        artifact: &CertificateArtifact,
        store: &dyn CertificateStore,
        stored: &StoredCertificate,
    ) -> Result<(), PluginError> {
        let bundle = artifact.bundle_path().display().to_string();
        let pfx = artifact.pfx_path().display().to_string();
        let thumbprint = stored.thumbprint.to_string();
        self.script
            .run(
                &target.host,
                &[
                    ("host", target.host.as_str()),
                    ("bundle", bundle.as_str()),
                    ("pfx", pfx.as_str()),
                    ("store", store.name()),
                    ("friendly_name", stored.friendly_name.as_str()),
                    ("thumbprint", thumbprint.as_str()),
                ],
            )
            .await
    }

    async fn install_central(&self, target: &Target, central_store: &Path) -> Result<(), PluginError> {
        self.script.run_central(&target.host, central_store).await
    }

    /// Unattended renewal cannot prompt for credentials
    fn renew(&self, target: &Target) -> Result<(), ConfigurationError> {
        let location = Self::web_root_location(target)?;
        self.credentials(&location).map(|_| ())
    }
}
