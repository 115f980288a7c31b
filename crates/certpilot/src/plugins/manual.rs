//! Manual plugin
//!
//! Validates by writing the HTTP-01 proof below a local web root and installs
//! by running the post-install script. When `<config-path>/web_config.xml`
//! exists it is copied to `web.config` beside the proof, for servers that
//! need a handler mapping to serve extensionless files.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use certpilot_common::ChallengeKind;
use certpilot_config::Config;

use super::script::ScriptInstaller;
use super::{InstallationPlugin, ValidationPlugin, MANUAL};
use crate::certificate::CertificateArtifact;
use crate::challenge::ChallengeProof;
use crate::error::{ConfigurationError, PluginError};
use crate::store::{CertificateStore, StoredCertificate};
use crate::target::Target;

/// Template copied beside HTTP proofs when present
pub const WEB_CONFIG_TEMPLATE: &str = "web_config.xml";

const WELL_KNOWN: &str = ".well-known";

pub struct ManualPlugin {
    config: Arc<Config>,
    script: ScriptInstaller,
}

impl ManualPlugin {
    pub fn new(config: Arc<Config>) -> Self {
        let script = ScriptInstaller::new(config.script.clone(), config.script_parameters.clone());
        Self { config, script }
    }

    fn web_config_template(&self) -> PathBuf {
        self.config.config_path.join(WEB_CONFIG_TEMPLATE)
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove `dir` if it exists and is empty
async fn remove_empty_dir(dir: &Path) -> io::Result<bool> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if entries.next_entry().await?.is_some() {
        return Ok(false);
    }
    fs::remove_dir(dir).await?;
    Ok(true)
}

#[async_trait]
impl ValidationPlugin for ManualPlugin {
    fn name(&self) -> &str {
        MANUAL
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::Http01
    }

    fn prepare(&self, target: &Target) -> Result<(), ConfigurationError> {
        match target.web_root.as_deref() {
            Some(root) if !root.trim().is_empty() => Ok(()),
            _ => Err(ConfigurationError::MissingParameter {
                plugin: MANUAL.to_string(),
                parameter: "a web root",
            }),
        }
    }

    async fn publish_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        let path = Path::new(&proof.location);
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "proof path has no directory"))?;
        fs::create_dir_all(dir).await?;
        fs::write(path, proof.content.as_bytes()).await?;
        info!(path = %path.display(), "Wrote challenge proof");

        let template = self.web_config_template();
        if fs::try_exists(&template).await? {
            fs::copy(&template, dir.join("web.config")).await?;
            debug!(dir = %dir.display(), "Copied web.config");
        }
        Ok(())
    }

    async fn retract_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        let path = Path::new(&proof.location);
        remove_if_present(path).await?;
        debug!(path = %path.display(), "Removed challenge proof");

        if !self.config.cleanup_folders {
            return Ok(());
        }
        let Some(challenge_dir) = path.parent() else {
            return Ok(());
        };
        remove_if_present(&challenge_dir.join("web.config")).await?;
        if remove_empty_dir(challenge_dir).await? {
            if let Some(well_known) = challenge_dir.parent().filter(|p| p.ends_with(WELL_KNOWN)) {
                remove_empty_dir(well_known).await?;
            }
            debug!(dir = %challenge_dir.display(), "Removed empty challenge folders");
        }
        Ok(())
    }
}

#[async_trait]
impl InstallationPlugin for ManualPlugin {
    fn name(&self) -> &str {
        MANUAL
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
}
