//! Configuration for certpilot
//!
//! The effective configuration is assembled once per invocation from three
//! layers, highest precedence first:
//!
//! 1. command-line flags (applied by the binary)
//! 2. the optional KDL settings file (`<config-path>/settings.kdl`)
//! 3. built-in defaults
//!
//! The resulting [`Config`] is passed explicitly to everything that needs
//! it; nothing reads configuration from global state.
//!
//! # Example settings file
//!
//! ```kdl
//! renewal-days 60
//! certificate-store "WebHosting"
//! fallback-certificate-store "My"
//! cleanup-folders true
//!
//! poll {
//!     interval-secs 2
//!     max-attempts 30
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, trace};

use certpilot_common::clean_file_name;

pub mod kdl;
pub mod validate;

pub use crate::kdl::{parse_settings, Settings};
pub use validate::{validate_config, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Let's Encrypt production directory
pub const DEFAULT_BASE_URI: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory, used with `--test`
pub const DEFAULT_STAGING_BASE_URI: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// File name of the KDL settings file inside the config path
pub const SETTINGS_FILE_NAME: &str = "settings.kdl";

pub const DEFAULT_RENEWAL_DAYS: u32 = 60;
pub const DEFAULT_CERTIFICATE_STORE: &str = "WebHosting";
pub const DEFAULT_FALLBACK_CERTIFICATE_STORE: &str = "My";

// ============================================================================
// Sub-configurations
// ============================================================================

/// Authorization poll loop bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between status checks
    pub interval: Duration,
    /// Status checks before giving up with a timeout
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

/// DNS-01 propagation checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsConfig {
    /// Look the TXT record up before telling the authority it exists
    pub propagation_check: bool,
    /// Lookups before giving up (the record is submitted anyway)
    pub propagation_attempts: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            propagation_check: true,
            propagation_attempts: 5,
        }
    }
}

/// FTP/FTPS login
#[derive(Clone, PartialEq, Eq)]
pub struct FtpCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for FtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Azure DNS service principal and zone
#[derive(Clone, PartialEq, Eq)]
pub struct AzureDnsConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
    /// DNS zone hosting the challenge records (e.g. `example.com`)
    pub zone: String,
    /// OAuth2 token endpoint host
    pub login_endpoint: String,
    /// Resource manager endpoint
    pub management_endpoint: String,
}

impl AzureDnsConfig {
    pub const DEFAULT_LOGIN_ENDPOINT: &'static str = "https://login.microsoftonline.com";
    pub const DEFAULT_MANAGEMENT_ENDPOINT: &'static str = "https://management.azure.com";
}

impl fmt::Debug for AzureDnsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureDnsConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("zone", &self.zone)
            .finish()
    }
}

// ============================================================================
// Config
// ============================================================================

/// Effective configuration for one invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// Authority directory URL
    pub base_uri: String,
    /// Staging mode (test authority, renewals scheduled after prompting)
    pub test: bool,
    /// Issue one certificate covering all alternative names
    pub san: bool,
    /// Comma-separated host groups, one per ad-hoc target
    pub manual_hosts: Vec<String>,
    /// Web root (or FTP URL) for an ad-hoc target
    pub web_root: Option<String>,
    /// Installation plugin name for ad-hoc targets
    pub plugin: Option<String>,
    /// Validation plugin override
    pub validation: Option<String>,
    /// Post-install script
    pub script: Option<PathBuf>,
    /// Parameter template for the post-install script
    pub script_parameters: Option<String>,
    /// Directory for per-identifier certificate artifacts
    pub cert_out_path: PathBuf,
    /// Password for the PKCS#12 archive; empty leaves it unprotected
    pub pfx_password: String,
    /// Keep superseded certificates in the store
    pub keep_existing: bool,
    /// Centralized certificate store directory
    pub central_ssl_store: Option<PathBuf>,
    /// Account contact address
    pub email: Option<String>,
    /// Terms of service accepted without prompting
    pub accept_tos: bool,
    /// Days between issuance and the scheduled renewal
    pub renewal_days: u32,
    pub certificate_store: String,
    pub fallback_certificate_store: String,
    /// Per-authority state directory
    pub config_path: PathBuf,
    /// Remove empty challenge folders after retraction
    pub cleanup_folders: bool,
    /// Treat every scheduled renewal as due
    pub force_renewal: bool,
    pub ftp: Option<FtpCredentials>,
    pub azure_dns: Option<AzureDnsConfig>,
    pub poll: PollConfig,
    pub dns: DnsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_base_uri(DEFAULT_BASE_URI)
    }
}

impl Config {
    /// Defaults for the given authority, with paths derived from its URI
    pub fn for_base_uri(base_uri: &str) -> Self {
        let config_path = default_config_path(base_uri);
        Self {
            base_uri: base_uri.to_string(),
            test: false,
            san: false,
            manual_hosts: Vec::new(),
            web_root: None,
            plugin: None,
            validation: None,
            script: None,
            script_parameters: None,
            cert_out_path: config_path.join("certificates"),
            pfx_password: String::new(),
            keep_existing: false,
            central_ssl_store: None,
            email: None,
            accept_tos: false,
            renewal_days: DEFAULT_RENEWAL_DAYS,
            certificate_store: DEFAULT_CERTIFICATE_STORE.to_string(),
            fallback_certificate_store: DEFAULT_FALLBACK_CERTIFICATE_STORE.to_string(),
            config_path,
            cleanup_folders: false,
            force_renewal: false,
            ftp: None,
            azure_dns: None,
            poll: PollConfig::default(),
            dns: DnsConfig::default(),
        }
    }

    /// Defaults for a config directory chosen by the caller
    ///
    /// Artifacts and state all live below `config_path`.
    pub fn with_config_path(base_uri: &str, config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        Self {
            cert_out_path: config_path.join("certificates"),
            config_path,
            ..Self::for_base_uri(base_uri)
        }
    }

    /// Path of the settings file for this config directory
    pub fn settings_path(&self) -> PathBuf {
        self.config_path.join(SETTINGS_FILE_NAME)
    }

    /// Load `settings.kdl` from the config path if present and apply it
    pub fn load_settings(&mut self) -> anyhow::Result<bool> {
        let path = self.settings_path();
        if !path.exists() {
            trace!(path = %path.display(), "No settings file");
            return Ok(false);
        }
        let settings = Settings::from_file(&path)?;
        self.apply_settings(settings);
        debug!(path = %path.display(), "Applied settings file");
        Ok(true)
    }

    /// Overlay settings-file values onto this configuration
    pub fn apply_settings(&mut self, settings: Settings) {
        if let Some(days) = settings.renewal_days {
            self.renewal_days = days;
        }
        if let Some(store) = settings.certificate_store {
            self.certificate_store = store;
        }
        if let Some(store) = settings.fallback_certificate_store {
            self.fallback_certificate_store = store;
        }
        if let Some(path) = settings.certificate_path {
            self.cert_out_path = path;
        }
        if let Some(password) = settings.pfx_password {
            self.pfx_password = password;
        }
        if let Some(cleanup) = settings.cleanup_folders {
            self.cleanup_folders = cleanup;
        }
        if let Some(keep) = settings.keep_existing {
            self.keep_existing = keep;
        }
        if settings.email.is_some() {
            self.email = settings.email;
        }
        if settings.script.is_some() {
            self.script = settings.script;
        }
        if settings.script_parameters.is_some() {
            self.script_parameters = settings.script_parameters;
        }
        if settings.central_ssl_store.is_some() {
            self.central_ssl_store = settings.central_ssl_store;
        }
        if let Some(interval) = settings.poll_interval {
            self.poll.interval = interval;
        }
        if let Some(attempts) = settings.poll_max_attempts {
            self.poll.max_attempts = attempts;
        }
        if let Some(check) = settings.dns_propagation_check {
            self.dns.propagation_check = check;
        }
        if let Some(attempts) = settings.dns_propagation_attempts {
            self.dns.propagation_attempts = attempts;
        }
        if settings.ftp.is_some() {
            self.ftp = settings.ftp;
        }
        if settings.azure_dns.is_some() {
            self.azure_dns = settings.azure_dns;
        }
    }

    /// Renewal period as a chrono-free duration
    pub fn renewal_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.renewal_days) * 86_400)
    }

    /// Path of the renewal schedule file
    pub fn renewals_path(&self) -> PathBuf {
        self.config_path.join("renewals.json")
    }

    /// Root of the directory-backed certificate stores
    pub fn stores_path(&self) -> PathBuf {
        self.config_path.join("stores")
    }

    /// Whether centralized-store mode is on
    pub fn uses_central_store(&self) -> bool {
        self.central_ssl_store.is_some()
    }
}

/// Base directory for all per-authority state
///
/// Uses the platform config directory, falling back to `./.certpilot` when
/// no home directory can be determined.
pub fn default_config_root() -> PathBuf {
    directories::ProjectDirs::from("org", "certpilot", "certpilot")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| Path::new(".certpilot").to_path_buf())
}

/// Per-authority state directory for `base_uri`
pub fn default_config_path(base_uri: &str) -> PathBuf {
    default_config_root().join(clean_file_name(base_uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.base_uri, DEFAULT_BASE_URI);
        assert_eq!(config.renewal_days, 60);
        assert_eq!(config.certificate_store, "WebHosting");
        assert_eq!(config.fallback_certificate_store, "My");
        assert_eq!(config.poll, PollConfig::default());
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert!(config
            .config_path
            .ends_with("httpsacme-v02.api.letsencrypt.orgdirectory"));
        assert_eq!(config.cert_out_path, config.config_path.join("certificates"));
    }

    #[test]
    fn test_with_config_path() {
        let config = Config::with_config_path(DEFAULT_STAGING_BASE_URI, "/tmp/cp");
        assert_eq!(config.base_uri, DEFAULT_STAGING_BASE_URI);
        assert_eq!(config.renewals_path(), PathBuf::from("/tmp/cp/renewals.json"));
        assert_eq!(config.stores_path(), PathBuf::from("/tmp/cp/stores"));
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/cp/settings.kdl"));
    }

    #[test]
    fn test_load_settings_overlays_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "renewal-days 30\ncertificate-store \"Shared\"\npoll {\n  max-attempts 5\n}\n",
        )
        .unwrap();

        let mut config = Config::with_config_path(DEFAULT_BASE_URI, dir.path());
        assert!(config.load_settings().unwrap());
        assert_eq!(config.renewal_days, 30);
        assert_eq!(config.certificate_store, "Shared");
        assert_eq!(config.fallback_certificate_store, "My");
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.interval, Duration::from_secs(2));
    }

    #[test]
    fn test_missing_settings_file_is_fine() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::with_config_path(DEFAULT_BASE_URI, dir.path());
        assert!(!config.load_settings().unwrap());
        assert_eq!(config.renewal_days, DEFAULT_RENEWAL_DAYS);
    }

    #[test]
    fn test_secrets_are_redacted() {
        let creds = FtpCredentials {
            username: "deploy".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("deploy"));
        assert!(!rendered.contains("hunter2"));
    }
}
