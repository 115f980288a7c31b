//! DNS-01 validation plugins
//!
//! Both plugins create a TXT record at `_acme-challenge.<identifier>` and can
//! check that the record is visible before the answer is submitted. The check
//! is best-effort: a record that does not show up in time is logged and the
//! authority gets the final word.

pub mod azure;
pub mod manual;

use std::time::Duration;

use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::AsyncResolver;
use tracing::{debug, info, warn};

use certpilot_config::DnsConfig;

const FIRST_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Wait until `record` carries a TXT value equal to `value`
///
/// Returns whether the value was seen. Always `true` when the check is
/// disabled.
pub async fn wait_for_propagation(record: &str, value: &str, config: &DnsConfig) -> bool {
    if !config.propagation_check || config.propagation_attempts == 0 {
        return true;
    }

    let resolver = match AsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            warn!(error = %err, "Cannot create DNS resolver, skipping propagation check");
            return false;
        }
    };

    let mut delay = FIRST_DELAY;
    for attempt in 1..=config.propagation_attempts {
        tokio::time::sleep(delay).await;
        match resolver.txt_lookup(record).await {
            Ok(lookup) => {
                if lookup.iter().any(|txt| txt.to_string() == value) {
                    info!(record = %record, attempt, "TXT record visible");
                    return true;
                }
            }
            Err(err) => {
                if !matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                    warn!(record = %record, error = %err, "TXT lookup failed");
                }
            }
        }
        debug!(record = %record, attempt, "TXT record not visible yet");
        delay = (delay * 2).min(MAX_DELAY);
    }

    warn!(
        record = %record,
        attempts = config.propagation_attempts,
        "TXT record not visible, submitting anyway"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_check_returns_immediately() {
        let config = DnsConfig {
            propagation_check: false,
            propagation_attempts: 5,
        };
        assert!(wait_for_propagation("_acme-challenge.example.invalid", "x", &config).await);

        let zero = DnsConfig {
            propagation_check: true,
            propagation_attempts: 0,
        };
        assert!(wait_for_propagation("_acme-challenge.example.invalid", "x", &zero).await);
    }
}
