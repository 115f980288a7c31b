//! Settings file parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{trace, warn};

use ::kdl::{KdlDocument, KdlNode};

use crate::{AzureDnsConfig, FtpCredentials};

use super::helpers::{find_node, get_bool_entry, get_int_entry, get_string_entry};

/// Values read from `settings.kdl`
///
/// Every field is optional; absent values leave the defaults untouched.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub renewal_days: Option<u32>,
    pub certificate_store: Option<String>,
    pub fallback_certificate_store: Option<String>,
    pub certificate_path: Option<PathBuf>,
    pub pfx_password: Option<String>,
    pub cleanup_folders: Option<bool>,
    pub keep_existing: Option<bool>,
    pub email: Option<String>,
    pub script: Option<PathBuf>,
    pub script_parameters: Option<String>,
    pub central_ssl_store: Option<PathBuf>,
    pub poll_interval: Option<Duration>,
    pub poll_max_attempts: Option<u32>,
    pub dns_propagation_check: Option<bool>,
    pub dns_propagation_attempts: Option<u32>,
    pub ftp: Option<FtpCredentials>,
    pub azure_dns: Option<AzureDnsConfig>,
}

const KNOWN_NODES: &[&str] = &[
    "renewal-days",
    "certificate-store",
    "fallback-certificate-store",
    "certificate-path",
    "pfx-password",
    "cleanup-folders",
    "keep-existing",
    "email",
    "script",
    "script-parameters",
    "central-ssl-store",
    "poll",
    "dns",
    "ftp",
    "azure-dns",
];

impl Settings {
    /// Read and parse a settings file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        parse_settings(&text).with_context(|| format!("Invalid settings file {}", path.display()))
    }
}

/// Parse settings from KDL text
pub fn parse_settings(text: &str) -> Result<Settings> {
    let doc: KdlDocument = text
        .parse()
        .map_err(|e| anyhow!("Failed to parse KDL: {}", e))?;

    for node in doc.nodes() {
        let name = node.name().value();
        if !KNOWN_NODES.contains(&name) {
            warn!(setting = %name, "Ignoring unknown setting");
        }
    }

    let mut settings = Settings {
        renewal_days: get_u32(&doc, "renewal-days")?,
        certificate_store: get_string_entry(&doc, "certificate-store"),
        fallback_certificate_store: get_string_entry(&doc, "fallback-certificate-store"),
        certificate_path: get_string_entry(&doc, "certificate-path").map(PathBuf::from),
        pfx_password: get_string_entry(&doc, "pfx-password"),
        cleanup_folders: get_bool_entry(&doc, "cleanup-folders"),
        keep_existing: get_bool_entry(&doc, "keep-existing"),
        email: get_string_entry(&doc, "email"),
        script: get_string_entry(&doc, "script").map(PathBuf::from),
        script_parameters: get_string_entry(&doc, "script-parameters"),
        central_ssl_store: get_string_entry(&doc, "central-ssl-store").map(PathBuf::from),
        ..Default::default()
    };

    if let Some(poll) = children(&doc, "poll") {
        settings.poll_interval = get_u32(poll, "interval-secs")?
            .map(|secs| Duration::from_secs(u64::from(secs)));
        settings.poll_max_attempts = get_u32(poll, "max-attempts")?;
    }

    if let Some(dns) = children(&doc, "dns") {
        settings.dns_propagation_check = get_bool_entry(dns, "propagation-check");
        settings.dns_propagation_attempts = get_u32(dns, "propagation-attempts")?;
    }

    if let Some(ftp) = children(&doc, "ftp") {
        settings.ftp = Some(parse_ftp(ftp)?);
    }

    if let Some(azure) = children(&doc, "azure-dns") {
        settings.azure_dns = Some(parse_azure_dns(azure)?);
    }

    trace!(
        renewal_days = ?settings.renewal_days,
        certificate_store = ?settings.certificate_store,
        has_ftp = settings.ftp.is_some(),
        has_azure_dns = settings.azure_dns.is_some(),
        "Parsed settings"
    );

    Ok(settings)
}

fn children<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlDocument> {
    find_node(doc, name).and_then(KdlNode::children)
}

fn get_u32(doc: &KdlDocument, name: &str) -> Result<Option<u32>> {
    get_int_entry(doc, name)
        .map(|v| {
            u32::try_from(v).map_err(|_| anyhow!("'{}' must be a non-negative integer, got {}", name, v))
        })
        .transpose()
}

fn required(doc: &KdlDocument, block: &str, name: &str) -> Result<String> {
    get_string_entry(doc, name).ok_or_else(|| {
        anyhow!(
            "'{}' block requires a '{}' field, e.g., {} \"...\"",
            block,
            name,
            name
        )
    })
}

fn parse_ftp(doc: &KdlDocument) -> Result<FtpCredentials> {
    Ok(FtpCredentials {
        username: required(doc, "ftp", "username")?,
        password: required(doc, "ftp", "password")?,
    })
}

fn parse_azure_dns(doc: &KdlDocument) -> Result<AzureDnsConfig> {
    Ok(AzureDnsConfig {
        tenant_id: required(doc, "azure-dns", "tenant-id")?,
        client_id: required(doc, "azure-dns", "client-id")?,
        client_secret: required(doc, "azure-dns", "client-secret")?,
        subscription_id: required(doc, "azure-dns", "subscription-id")?,
        resource_group: required(doc, "azure-dns", "resource-group")?,
        zone: required(doc, "azure-dns", "zone")?,
        login_endpoint: get_string_entry(doc, "login-endpoint")
            .unwrap_or_else(|| AzureDnsConfig::DEFAULT_LOGIN_ENDPOINT.to_string()),
        management_endpoint: get_string_entry(doc, "management-endpoint")
            .unwrap_or_else(|| AzureDnsConfig::DEFAULT_MANAGEMENT_ENDPOINT.to_string()),
    })
}
