//! Configuration validation
//!
//! Collects every problem at once instead of stopping at the first, so
//! `certpilot check-config` can report them together.

use std::fmt;

use url::Url;

use crate::Config;

/// Area of configuration a finding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authority,
    Renewal,
    Script,
    Store,
    Polling,
    Plugin,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Authority => "authority",
            ErrorCategory::Renewal => "renewal",
            ErrorCategory::Script => "script",
            ErrorCategory::Store => "store",
            ErrorCategory::Polling => "polling",
            ErrorCategory::Plugin => "plugin",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{category}] {message}")]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors and warnings found in one validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate an assembled configuration
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match Url::parse(&config.base_uri) {
        Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {
            if url.scheme() == "http" {
                result.add_warning(ValidationWarning::new(format!(
                    "Authority '{}' is not using HTTPS",
                    config.base_uri
                )));
            }
        }
        Ok(url) => result.add_error(ValidationError::new(
            ErrorCategory::Authority,
            format!("Unsupported authority URI scheme '{}'", url.scheme()),
        )),
        Err(e) => result.add_error(ValidationError::new(
            ErrorCategory::Authority,
            format!("Invalid authority URI '{}': {}", config.base_uri, e),
        )),
    }

    if !(1..=365).contains(&config.renewal_days) {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            format!(
                "Renewal period must be between 1 and 365 days, got {}",
                config.renewal_days
            ),
        ));
    } else if config.renewal_days > 89 {
        result.add_warning(ValidationWarning::new(format!(
            "Renewal period of {} days exceeds a 90-day certificate lifetime",
            config.renewal_days
        )));
    }

    if config.script_parameters.is_some() && config.script.is_none() {
        result.add_error(ValidationError::new(
            ErrorCategory::Script,
            "Script parameters are set but no script is configured",
        ));
    }
    if let Some(ref script) = config.script {
        if !script.exists() {
            result.add_warning(ValidationWarning::new(format!(
                "Post-install script not found: {}",
                script.display()
            )));
        }
    }

    if let Some(ref central) = config.central_ssl_store {
        if !central.is_dir() {
            result.add_error(ValidationError::new(
                ErrorCategory::Store,
                format!("Central certificate store not found: {}", central.display()),
            ));
        }
    }
    if config.certificate_store.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Store,
            "Certificate store name is empty",
        ));
    }

    if config.poll.max_attempts == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Polling,
            "Poll max-attempts must be at least 1",
        ));
    }

    if config.email.is_none() {
        result.add_warning(ValidationWarning::new(
            "No contact email configured (expiry notices will not be sent)",
        ));
    }

    result
}
