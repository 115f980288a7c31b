//! Account credentials and registration storage
//!
//! One directory per authority base URI holds the signer material and the
//! registration record:
//!
//! ```text
//! <config-path>/
//! ├── credentials.json   # opaque instant-acme credentials (0600)
//! └── account.json       # registration record (contact, created)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use instant_acme::{Account, AccountCredentials, NewAccount};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use certpilot_common::fs::write_atomic;

use crate::error::AuthorityError;

const CREDENTIALS_FILE: &str = "credentials.json";
const ACCOUNT_FILE: &str = "account.json";

/// Registration record kept beside the credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccount {
    pub base_uri: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    pub terms_of_service_agreed: bool,
    pub created: DateTime<Utc>,
}

/// Persisted account state for one authority
#[derive(Debug, Clone)]
pub struct AccountStorage {
    base_path: PathBuf,
}

impl AccountStorage {
    /// Open (creating if needed) the per-authority directory
    pub fn new(base_path: &Path) -> Result<Self, AuthorityError> {
        fs::create_dir_all(base_path).map_err(|e| {
            AuthorityError::Account(format!("cannot create {}: {}", base_path.display(), e))
        })?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Whether credentials for this authority exist
    pub fn has_credentials(&self) -> bool {
        self.base_path.join(CREDENTIALS_FILE).exists()
    }

    pub fn load_account(&self) -> Result<Option<StoredAccount>, AuthorityError> {
        let path = self.base_path.join(ACCOUNT_FILE);
        if !path.exists() {
            trace!("No stored account record");
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(account_io)?;
        let account: StoredAccount = serde_json::from_str(&content).map_err(account_json)?;
        debug!(
            contact = ?account.contact_email,
            created = %account.created,
            "Loaded account record"
        );
        Ok(Some(account))
    }

    pub fn save_account(&self, account: &StoredAccount) -> Result<(), AuthorityError> {
        let path = self.base_path.join(ACCOUNT_FILE);
        let content = serde_json::to_vec_pretty(account).map_err(account_json)?;
        write_atomic(&path, &content, Some(0o600)).map_err(account_io)?;
        info!(contact = ?account.contact_email, "Saved account record");
        Ok(())
    }

    /// Raw credentials JSON, if stored
    pub fn load_credentials_json(&self) -> Result<Option<String>, AuthorityError> {
        let path = self.base_path.join(CREDENTIALS_FILE);
        if !path.exists() {
            trace!("No stored account credentials");
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(account_io)?;
        debug!("Loaded account credentials");
        Ok(Some(content))
    }

    pub fn save_credentials_json(&self, json: &str) -> Result<(), AuthorityError> {
        let path = self.base_path.join(CREDENTIALS_FILE);
        write_atomic(&path, json.as_bytes(), Some(0o600)).map_err(account_io)?;
        info!("Saved account credentials");
        Ok(())
    }

    /// Load the stored account or register a new one
    ///
    /// Registration needs `terms_agreed`; callers ask the operator first
    /// when running interactively.
    pub async fn load_or_register(
        &self,
        base_uri: &str,
        email: Option<&str>,
        terms_agreed: bool,
    ) -> Result<Account, AuthorityError> {
        if let Some(json) = self.load_credentials_json()? {
            let credentials: AccountCredentials =
                serde_json::from_str(&json).map_err(account_json)?;
            let account = Account::from_credentials(credentials).await?;
            debug!(base_uri = %base_uri, "Using stored account");
            return Ok(account);
        }

        if !terms_agreed {
            return Err(AuthorityError::Account(
                "terms of service must be accepted to register an account".to_string(),
            ));
        }

        info!(base_uri = %base_uri, contact = ?email, "Registering new account");
        let contact = email.map(|e| format!("mailto:{}", e));
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact_refs,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            base_uri,
            None,
        )
        .await?;

        let json = serde_json::to_string_pretty(&credentials).map_err(account_json)?;
        self.save_credentials_json(&json)?;
        self.save_account(&StoredAccount {
            base_uri: base_uri.to_string(),
            contact_email: email.map(str::to_string),
            terms_of_service_agreed: true,
            created: Utc::now(),
        })?;

        Ok(account)
    }
}

fn account_io(err: std::io::Error) -> AuthorityError {
    AuthorityError::Account(err.to_string())
}

fn account_json(err: serde_json::Error) -> AuthorityError {
    AuthorityError::Account(format!("invalid account data: {}", err))
}
