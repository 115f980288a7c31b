//! certpilot library
//!
//! Issues and renews certificates from an ACME authority for arbitrary
//! install targets. The pieces:
//!
//! - **Targets**: what to certify and which plugins handle it
//! - **Plugins**: interchangeable validation and installation capabilities
//! - **Challenge orchestration**: publish, submit, poll, retract per identifier
//! - **Acquisition**: key, CSR, certificate, chain and bundle on disk
//! - **Renewal**: a persisted, host-keyed schedule and the pass that re-drives it
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certpilot::{PluginContext, PluginRegistry, Runner, NonInteractive, Target};
//! use certpilot_config::Config;
//!
//! let config = Arc::new(Config::default());
//! let console = Arc::new(NonInteractive);
//! let registry = PluginRegistry::builtin(&PluginContext::new(config.clone(), console.clone()));
//! let runner = Runner::new(config, registry, console, Default::default());
//!
//! let target = Target::new("example.com", "Manual").with_web_root("/var/www");
//! runner.issue(&mut authority, &target, true).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod certificate;
pub mod challenge;
pub mod console;
pub mod error;
pub mod install;
pub mod plugins;
pub mod renewal;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod target;

#[cfg(test)]
mod testing;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Authority
pub use acme::{AccountStorage, AcmeAuthority, AuthorityClient};

// Orchestration and acquisition
pub use certificate::{AcquisitionPipeline, CertificateArtifact};
pub use challenge::{AuthorizationOutcome, ChallengeOrchestrator, ChallengeProof};

// Plugins
pub use plugins::{InstallationPlugin, PluginContext, PluginRegistry, ValidationPlugin};

// Stores and scheduling
pub use renewal::{RenewalStore, RenewalSummary, ScheduledRenewal};
pub use scheduler::{RenewalTask, SystemdTimerScheduler, TaskScheduler};
pub use store::{CertificateStore, DirectoryCertificateStore};

// Process modes
pub use console::{Console, NonInteractive, TerminalConsole};
pub use error::{CertPilotError, Result};
pub use runner::{BatchSummary, RunOutcome, Runner};
pub use target::Target;
