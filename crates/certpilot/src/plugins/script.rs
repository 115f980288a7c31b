//! Post-install script installer
//!
//! Runs the configured script after a certificate was installed so server
//! software can pick it up. Parameters come from a template with
//! placeholders:
//!
//! | Placeholder | Store install | Central install |
//! |---|---|---|
//! | `{host}` | primary host | primary host |
//! | `{bundle}` | bundle path | |
//! | `{pfx}` | PKCS#12 archive path | |
//! | `{store}` | store name | |
//! | `{friendly_name}` | friendly name | |
//! | `{thumbprint}` | thumbprint | |
//! | `{central_store}` | | central store directory |

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::PluginError;

#[derive(Debug, Clone, Default)]
pub struct ScriptInstaller {
    script: Option<PathBuf>,
    parameters: Option<String>,
}

impl ScriptInstaller {
    pub fn new(script: Option<PathBuf>, parameters: Option<String>) -> Self {
        Self { script, parameters }
    }

    pub fn is_configured(&self) -> bool {
        self.script.is_some()
    }

    /// Expand the parameter template into arguments
    ///
    /// Splitting happens before substitution, so values with spaces stay one
    /// argument.
    pub fn arguments(&self, values: &[(&str, &str)]) -> Vec<String> {
        let Some(ref template) = self.parameters else {
            return Vec::new();
        };
        template
            .split_whitespace()
            .map(|word| {
                values.iter().fold(word.to_string(), |acc, (key, value)| {
                    acc.replace(&format!("{{{}}}", key), value)
                })
            })
            .collect()
    }

    /// Run the script, or warn when none is configured
    pub async fn run(&self, host: &str, values: &[(&str, &str)]) -> Result<(), PluginError> {
        let Some(ref script) = self.script else {
            warn!(
                host = %host,
                "No installation script configured; server software was not updated"
            );
            return Ok(());
        };

        let args = self.arguments(values);
        info!(script = %script.display(), host = %host, "Running installation script");
        debug!(args = ?args, "Script arguments");

        let output = Command::new(script)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PluginError::Script(format!("cannot run {}: {}", script.display(), e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!(script = %script.display(), "{}", line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PluginError::Script(format!(
                "{} exited with {}: {}",
                script.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Run for a centralized-store install
    pub async fn run_central(&self, host: &str, central_store: &Path) -> Result<(), PluginError> {
        let central = central_store.display().to_string();
        self.run(host, &[("host", host), ("central_store", central.as_str())]).await
    }
}
