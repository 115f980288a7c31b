//! Installation dispatch
//!
//! Hands an issued certificate to the target's installation plugin. In store
//! mode the certificate is added to a certificate store first and the plugin
//! binds it; in centralized-store mode the bundle is copied to
//! `<central-store>/<host>.pem` and `<host>.pfx` for every host instead. Merged targets
//! install once per member with the one shared artifact.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use certpilot_common::clean_file_name;
use certpilot_common::fs::write_atomic;
use certpilot_config::Config;

use crate::certificate::CertificateArtifact;
use crate::error::{CertPilotError, PluginError, StoreError};
use crate::plugins::InstallationPlugin;
use crate::store::{CertificateStore, DirectoryCertificateStore, StoredCertificate};
use crate::target::Target;

/// Install `artifact` for `target` through `plugin`
///
/// A failure here leaves the issued artifact on disk; nothing is rolled back.
pub async fn install_certificate(
    config: &Config,
    plugin: &dyn InstallationPlugin,
    target: &Target,
    artifact: &CertificateArtifact,
) -> Result<(), CertPilotError> {
    match config.central_ssl_store {
        Some(ref central) => install_central(central, plugin, target, artifact).await,
        None => {
            let (store, stored) = add_to_store(config, artifact)?;
            let result =
                install_into_store(&store, &stored, config.keep_existing, plugin, target, artifact).await;
            store.close();
            result
        }
    }
}

/// Open the configured store and add `artifact` to it
///
/// When the store rejects the certificate it is closed and the add is
/// retried once in the fallback store.
fn add_to_store(
    config: &Config,
    artifact: &CertificateArtifact,
) -> Result<(DirectoryCertificateStore, StoredCertificate), StoreError> {
    let root = config.stores_path();
    let store = DirectoryCertificateStore::open_with_fallback(
        &root,
        &config.certificate_store,
        &config.fallback_certificate_store,
    )?;
    let err = match store.add(artifact) {
        Ok(stored) => return Ok((store, stored)),
        Err(err) => err,
    };
    store.close();
    if store.name() == config.fallback_certificate_store {
        return Err(err);
    }

    warn!(
        store = %store.name(),
        fallback = %config.fallback_certificate_store,
        error = %err,
        "Adding certificate failed, retrying in fallback store"
    );
    let fallback = DirectoryCertificateStore::open(&root, &config.fallback_certificate_store)?;
    match fallback.add(artifact) {
        Ok(stored) => Ok((fallback, stored)),
        Err(err) => {
            fallback.close();
            Err(err)
        }
    }
}

/// Let the plugin bind a certificate already added to `store`
pub async fn install_into_store(
    store: &dyn CertificateStore,
    stored: &StoredCertificate,
    keep_existing: bool,
    plugin: &dyn InstallationPlugin,
    target: &Target,
    artifact: &CertificateArtifact,
) -> Result<(), CertPilotError> {
    for member in target.install_targets() {
        plugin.install(member, artifact, store, stored).await?;
        info!(
            plugin = %plugin.name(),
            target = %member,
            store = %store.name(),
            thumbprint = %stored.thumbprint,
            "Installed certificate"
        );
    }

    if keep_existing {
        debug!(store = %store.name(), "Keeping existing certificates");
    } else {
        for member in target.install_targets() {
            plugin.uninstall(member, store, &stored.thumbprint)?;
        }
    }
    Ok(())
}

async fn install_central(
    central: &Path,
    plugin: &dyn InstallationPlugin,
    target: &Target,
    artifact: &CertificateArtifact,
) -> Result<(), CertPilotError> {
    let bundle = fs::read(artifact.bundle_path()).map_err(PluginError::Io)?;
    let pfx = fs::read(artifact.pfx_path()).map_err(PluginError::Io)?;
    for host in &artifact.hosts {
        let name = clean_file_name(host.as_str());
        for (ext, contents) in [("pem", &bundle), ("pfx", &pfx)] {
            let path = central.join(format!("{}.{}", name, ext));
            write_atomic(&path, contents, Some(0o600)).map_err(PluginError::Io)?;
            debug!(domain = %host, path = %path.display(), "Copied bundle to central store");
        }
    }

    for member in target.install_targets() {
        if let Err(err) = plugin.install_central(member, central).await {
            warn!(target = %member, error = %err, "Central store installation failed");
            return Err(err.into());
        }
        info!(
            plugin = %plugin.name(),
            target = %member,
            central_store = %central.display(),
            "Installed certificate in central store"
        );
    }
    Ok(())
}
