//! certpilot - Main entry point
//!
//! Issues and renews ACME certificates. Each invocation does one job and
//! exits; renewals are driven by a recurring `certpilot renew`.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certpilot::acme::{AccountStorage, AcmeAuthority};
use certpilot::console::{Console, NonInteractive, TerminalConsole};
use certpilot::plugins::{PluginContext, PluginRegistry};
use certpilot::renewal::RenewalStore;
use certpilot::scheduler::{RenewalTask, SystemdTimerScheduler, TaskScheduler};
use certpilot::{RunOutcome, Runner};
use certpilot_config::{
    validate_config, Config, FtpCredentials, DEFAULT_BASE_URI, DEFAULT_STAGING_BASE_URI,
};

/// certpilot - ACME certificate issuance and renewal
#[derive(Parser, Debug)]
#[command(name = "certpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Authority directory URL
    #[arg(long = "base-uri", env = "CERTPILOT_BASE_URI", global = true)]
    base_uri: Option<String>,

    /// Use the staging authority
    #[arg(long = "test", global = true)]
    test: bool,

    /// State directory (account, schedule, settings.kdl)
    #[arg(long = "config-path", env = "CERTPILOT_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    /// Contact address for the authority account
    #[arg(long = "email", env = "CERTPILOT_EMAIL", global = true)]
    email: Option<String>,

    /// Accept the authority's terms of service without asking
    #[arg(long = "accept-tos", global = true)]
    accept_tos: bool,

    /// Issue one certificate for all host names
    #[arg(long = "san", global = true)]
    san: bool,

    /// Post-install script
    #[arg(long = "script", global = true)]
    script: Option<PathBuf>,

    /// Parameter template for the post-install script
    #[arg(long = "script-parameters", global = true, allow_hyphen_values = true)]
    script_parameters: Option<String>,

    /// Directory for certificate artifacts
    #[arg(long = "cert-out-path", global = true)]
    cert_out_path: Option<PathBuf>,

    /// Keep superseded certificates in the store
    #[arg(long = "keep-existing", global = true)]
    keep_existing: bool,

    /// Copy bundles to this centralized store instead of a certificate store
    #[arg(long = "central-ssl-store", global = true)]
    central_ssl_store: Option<PathBuf>,

    /// Days until a certificate is renewed
    #[arg(long = "renewal-days", global = true)]
    renewal_days: Option<u32>,

    /// FTP user name
    #[arg(long = "ftp-user", env = "CERTPILOT_FTP_USER", global = true)]
    ftp_user: Option<String>,

    /// FTP password
    #[arg(long = "ftp-password", env = "CERTPILOT_FTP_PASSWORD", global = true, hide_env_values = true)]
    ftp_password: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue a certificate (default)
    Issue(IssueArgs),
    /// Renew every certificate that is due
    Renew {
        /// Renew everything, due or not
        #[arg(long = "force")]
        force: bool,
    },
    /// Show the renewal schedule
    List,
    /// Remove a host from the renewal schedule
    Cancel {
        host: String,
    },
    /// Register the recurring renewal check
    RegisterTask {
        /// Where to write the systemd units
        #[arg(long = "unit-dir", default_value = "/etc/systemd/system")]
        unit_dir: PathBuf,
    },
    /// Validate configuration and exit
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct IssueArgs {
    /// Comma-separated host names; issues without prompting. Repeat for
    /// several certificates, or add --san to merge the groups into one
    #[arg(long = "host")]
    host: Vec<String>,

    /// Web root or ftp:// URL for HTTP validation
    #[arg(long = "webroot")]
    web_root: Option<String>,

    /// Installation plugin
    #[arg(long = "plugin")]
    plugin: Option<String>,

    /// Validation plugin, when it differs from the installation plugin
    #[arg(long = "validation")]
    validation: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    // Process-wide crypto provider for FTPS and HTTPS
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut config = build_config(&cli)?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::List) => list_renewals(&config),
        Some(Commands::Cancel { ref host }) => cancel_renewal(&config, host),
        Some(Commands::RegisterTask { ref unit_dir }) => register_task(&config, unit_dir.clone()),
        Some(Commands::Renew { force }) => {
            config.force_renewal = force;
            run(config, Mode::Renew)
        }
        Some(Commands::Issue(args)) => {
            apply_issue_args(&mut config, args);
            run(config, Mode::Issue)
        }
        None => run(config, Mode::Issue),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .init();
    }
}

/// Defaults, then settings.kdl, then flags
fn build_config(cli: &Cli) -> Result<Config> {
    let base_uri = cli.base_uri.clone().unwrap_or_else(|| {
        if cli.test {
            DEFAULT_STAGING_BASE_URI.to_string()
        } else {
            DEFAULT_BASE_URI.to_string()
        }
    });

    let mut config = match cli.config_path {
        Some(ref path) => Config::with_config_path(&base_uri, path),
        None => Config::for_base_uri(&base_uri),
    };
    config
        .load_settings()
        .with_context(|| format!("Failed to load {}", config.settings_path().display()))?;

    config.test = cli.test;
    config.san = cli.san;
    config.accept_tos = cli.accept_tos;
    config.keep_existing |= cli.keep_existing;
    if cli.email.is_some() {
        config.email = cli.email.clone();
    }
    if cli.script.is_some() {
        config.script = cli.script.clone();
    }
    if cli.script_parameters.is_some() {
        config.script_parameters = cli.script_parameters.clone();
    }
    if let Some(ref path) = cli.cert_out_path {
        config.cert_out_path = path.clone();
    }
    if cli.central_ssl_store.is_some() {
        config.central_ssl_store = cli.central_ssl_store.clone();
    }
    if let Some(days) = cli.renewal_days {
        config.renewal_days = days;
    }
    if let (Some(user), Some(password)) = (&cli.ftp_user, &cli.ftp_password) {
        config.ftp = Some(FtpCredentials {
            username: user.clone(),
            password: password.clone(),
        });
    }

    debug!(
        base_uri = %config.base_uri,
        config_path = %config.config_path.display(),
        "Configuration assembled"
    );
    Ok(config)
}

fn apply_issue_args(config: &mut Config, args: IssueArgs) {
    config.manual_hosts = args.host;
    config.web_root = args.web_root;
    config.plugin = args.plugin;
    config.validation = args.validation;
}

/// Validate configuration and exit
fn check_config(config: &Config) -> Result<()> {
    let result = validate_config(config);
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for error in &result.errors {
        tracing::error!("{}", error);
    }
    if !result.is_ok() {
        bail!("configuration has {} error(s)", result.errors.len());
    }

    println!(
        "certpilot: configuration for {} is valid ({})",
        config.base_uri,
        config.config_path.display()
    );
    Ok(())
}

fn list_renewals(config: &Config) -> Result<()> {
    let store = RenewalStore::load(config.renewals_path()).context("Failed to load renewal schedule")?;
    if store.list().is_empty() {
        println!("No scheduled renewals");
        return Ok(());
    }
    for renewal in store.list() {
        println!(
            "{}  due {}  {}",
            renewal.host,
            renewal.due.format("%Y-%m-%d %H:%M UTC"),
            renewal.target
        );
    }
    Ok(())
}

fn cancel_renewal(config: &Config, host: &str) -> Result<()> {
    let mut store = RenewalStore::load(config.renewals_path()).context("Failed to load renewal schedule")?;
    if store.remove(host)? {
        println!("Renewal for {} cancelled", host);
    } else {
        println!("No renewal scheduled for {}", host);
    }
    Ok(())
}

fn register_task(config: &Config, unit_dir: PathBuf) -> Result<()> {
    let task = RenewalTask::current(config)?;
    let written = SystemdTimerScheduler::new(unit_dir).register(&task)?;
    for path in &written {
        println!("Wrote {}", path.display());
    }
    println!("Enable with: systemctl enable --now certpilot-renew.timer");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Issue,
    Renew,
}

fn run(config: Config, mode: Mode) -> Result<()> {
    let validation = validate_config(&config);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if let Some(error) = validation.errors.first() {
        bail!("invalid configuration: {}", error);
    }

    let interactive = mode == Mode::Issue && config.manual_hosts.is_empty() && std::io::stdin().is_terminal();
    let console: Arc<dyn Console> = if interactive {
        Arc::new(TerminalConsole)
    } else {
        Arc::new(NonInteractive)
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(execute(config, mode, console, interactive))
}

async fn execute(config: Config, mode: Mode, console: Arc<dyn Console>, interactive: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let config = Arc::new(config);
    let mut authority = connect(&config, console.as_ref()).await?;
    let registry = PluginRegistry::builtin(&PluginContext::new(config.clone(), console.clone()));
    let runner = Runner::new(config.clone(), registry, console, cancel);

    if mode == Mode::Renew {
        let summary = runner.renew_due(&mut authority).await?;
        if !summary.failed.is_empty() {
            bail!("{} renewal(s) failed: {}", summary.failed.len(), summary.failed.join(", "));
        }
        return Ok(());
    }

    if !interactive {
        let summary = runner.issue_unattended(&mut authority).await?;
        if !summary.failed.is_empty() {
            bail!("{} request(s) failed: {}", summary.failed.len(), summary.failed.join(", "));
        }
        return Ok(());
    }

    match runner.issue_interactive(&mut authority).await? {
        Some(RunOutcome::Installed { bundle, thumbprint }) => {
            info!(bundle = %bundle.display(), thumbprint = %thumbprint, "Certificate installed");
            Ok(())
        }
        Some(RunOutcome::AuthorizationFailed(outcome)) => bail!("{}", outcome),
        None => Ok(()),
    }
}

/// Load the account for the authority, registering one on first use
async fn connect(config: &Config, console: &dyn Console) -> Result<AcmeAuthority> {
    let storage = AccountStorage::new(&config.config_path).context("Failed to open account storage")?;

    let mut email = config.email.clone();
    let mut accept_tos = config.accept_tos;
    if !storage.has_credentials() && console.is_interactive() {
        if email.is_none() {
            let answer = console.prompt("Enter an email address for expiry notices (optional)")?;
            email = Some(answer.trim().to_string()).filter(|e| !e.is_empty());
        }
        if !accept_tos {
            accept_tos = console.confirm("Do you agree to the terms of service of the authority?", false)?;
        }
    }

    let account = storage
        .load_or_register(&config.base_uri, email.as_deref(), accept_tos)
        .await
        .with_context(|| format!("Failed to load or register an account with {}", config.base_uri))?;
    Ok(AcmeAuthority::new(config.base_uri.clone(), account))
}

/// Cancel on Ctrl-C or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal, cancelling");
    cancel.cancel();
}
