//! Certificate authority access
//!
//! - [`authority`]: the contract the orchestrator and pipeline consume
//! - [`client`]: that contract over an RFC 8555 client
//! - [`account`]: per-authority credentials and registration record

pub mod account;
pub mod authority;
pub mod client;

pub use account::{AccountStorage, StoredAccount};
pub use authority::{AuthorityClient, AuthorizationState, CertificateResponse, ChallengeDetails};
pub use client::AcmeAuthority;
