//! Shared vocabulary for certpilot crates.
//!
//! - [`ids`]: identifier and thumbprint newtypes
//! - [`types`]: challenge kinds and authorization status
//! - [`names`]: host-set resolution (dedupe, case-normalize, exclusions, SAN limit)
//! - [`fs`]: write-temp-then-rename file replacement

pub mod fs;
pub mod ids;
pub mod names;
pub mod types;

pub use ids::{Identifier, Thumbprint};
pub use names::{clean_file_name, resolve_host_set, split_host_list, HostSetError, MAX_NAMES};
pub use types::{AuthorizationStatus, ChallengeKind};
