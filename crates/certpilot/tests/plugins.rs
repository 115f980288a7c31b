//! Plugin table and manual HTTP validation through the public API

use std::sync::Arc;

use certpilot::challenge::{http_proof_location, ChallengeProof};
use certpilot::console::ScriptedConsole;
use certpilot::error::ConfigurationError;
use certpilot::plugins::{ManualPlugin, AZURE_DNS, FTP, MANUAL, MANUAL_DNS};
use certpilot::{PluginContext, PluginRegistry, Target, ValidationPlugin};
use certpilot_common::{ChallengeKind, Identifier};
use certpilot_config::Config;
use tempfile::TempDir;

fn registry(config: Config) -> PluginRegistry {
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    PluginRegistry::builtin(&PluginContext::new(Arc::new(config), console))
}

#[test]
fn builtin_table_lookups() {
    let registry = registry(Config::default());

    let names: Vec<&str> = registry.names().collect();
    assert_eq!(names, vec![MANUAL, FTP, MANUAL_DNS, AZURE_DNS]);

    assert!(registry.validation(MANUAL).is_ok());
    assert!(registry.installation(MANUAL).is_ok());
    assert!(registry.validation(FTP).is_ok());
    assert!(registry.installation(FTP).is_ok());
    assert_eq!(
        registry.validation(MANUAL_DNS).unwrap().challenge_kind(),
        ChallengeKind::Dns01
    );

    assert!(matches!(
        registry.installation(MANUAL_DNS),
        Err(ConfigurationError::NotAnInstallationPlugin(name)) if name == MANUAL_DNS
    ));
    assert!(matches!(
        registry.validation("Nope"),
        Err(ConfigurationError::UnknownPlugin(name)) if name == "Nope"
    ));
}

#[tokio::test]
async fn manual_proof_is_published_and_cleaned_up() {
    let state = TempDir::new().unwrap();
    let site = TempDir::new().unwrap();
    let mut config = Config::with_config_path(certpilot_config::DEFAULT_STAGING_BASE_URI, state.path());
    config.cleanup_folders = true;
    let plugin = ManualPlugin::new(Arc::new(config));

    let web_root = site.path().display().to_string();
    let target = Target::new("example.com", MANUAL).with_web_root(web_root.as_str());
    plugin.prepare(&target).unwrap();

    let proof = ChallengeProof {
        identifier: Identifier::parse("example.com").unwrap(),
        kind: ChallengeKind::Http01,
        location: http_proof_location(&web_root, "tok3n"),
        token: "tok3n".to_string(),
        content: "tok3n.key-auth".to_string(),
    };

    plugin.publish_proof(&target, &proof).await.unwrap();
    let written = site.path().join(".well-known/acme-challenge/tok3n");
    assert_eq!(std::fs::read_to_string(&written).unwrap(), "tok3n.key-auth");

    plugin.retract_proof(&target, &proof).await.unwrap();
    assert!(!written.exists());
    assert!(!site.path().join(".well-known").exists());
    assert!(site.path().exists());
}

#[test]
fn manual_requires_a_web_root() {
    let plugin = ManualPlugin::new(Arc::new(Config::default()));
    let target = Target::new("example.com", MANUAL);
    assert!(matches!(
        plugin.prepare(&target),
        Err(ConfigurationError::MissingParameter { parameter: "a web root", .. })
    ));
}
