//! Renewal schedule
//!
//! The schedule holds at most one [`ScheduledRenewal`] per host, each with a
//! snapshot of the target it was issued for. The whole collection is
//! rewritten on every change through a temp file and rename, so overlapping
//! invocations never see a truncated file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use certpilot_common::fs::write_atomic;

use crate::error::{CertPilotError, RenewalStoreError};
use crate::target::Target;

/// One scheduled reacquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRenewal {
    pub host: String,
    pub target: Target,
    pub due: DateTime<Utc>,
}

impl ScheduledRenewal {
    pub fn new(target: Target, due: DateTime<Utc>) -> Self {
        Self {
            host: target.host.clone(),
            target,
            due,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }
}

/// Persisted renewal schedule keyed by host
#[derive(Debug)]
pub struct RenewalStore {
    path: PathBuf,
    entries: Vec<ScheduledRenewal>,
}

impl RenewalStore {
    /// Load the schedule at `path`; a missing file is an empty schedule
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RenewalStoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "No renewal schedule yet");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "Loaded renewal schedule");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole schedule
    pub fn persist(&self) -> Result<(), RenewalStoreError> {
        let content = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(&self.path, &content, None)?;
        trace!(path = %self.path.display(), entries = self.entries.len(), "Persisted renewal schedule");
        Ok(())
    }

    /// Replace any entry for the same host, then persist
    pub fn upsert(&mut self, renewal: ScheduledRenewal) -> Result<(), RenewalStoreError> {
        self.entries.retain(|e| !e.host.eq_ignore_ascii_case(&renewal.host));
        info!(host = %renewal.host, due = %renewal.due, "Scheduled renewal");
        self.entries.push(renewal);
        self.persist()
    }

    /// Drop the entry for `host`; returns whether one existed
    pub fn remove(&mut self, host: &str) -> Result<bool, RenewalStoreError> {
        let before = self.entries.len();
        self.entries.retain(|e| !e.host.eq_ignore_ascii_case(host));
        if self.entries.len() == before {
            return Ok(false);
        }
        info!(host = %host, "Cancelled scheduled renewal");
        self.persist()?;
        Ok(true)
    }

    pub fn get(&self, host: &str) -> Option<&ScheduledRenewal> {
        self.entries.iter().find(|e| e.host.eq_ignore_ascii_case(host))
    }

    pub fn list(&self) -> &[ScheduledRenewal] {
        &self.entries
    }

    /// Entries due at or before `now`
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduledRenewal> {
        self.entries.iter().filter(|e| e.is_due(now)).cloned().collect()
    }
}

/// Re-runs the issuance sequence for a scheduled target
#[async_trait]
pub trait RenewalDriver: Send {
    async fn renew(&mut self, target: &Target) -> Result<(), CertPilotError>;
}

/// What a renewal pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalSummary {
    pub renewed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: usize,
}

/// Renew every due entry
///
/// Each successful renewal moves the entry's due date to `now + period` and
/// persists right away. A failed entry is logged and left due; the pass goes
/// on with the next one. `force` treats every entry as due.
pub async fn check_renewals(
    store: &mut RenewalStore,
    driver: &mut dyn RenewalDriver,
    now: DateTime<Utc>,
    period: Duration,
    force: bool,
) -> Result<RenewalSummary, RenewalStoreError> {
    let candidates: Vec<ScheduledRenewal> = if force {
        store.list().to_vec()
    } else {
        store.due(now)
    };
    let mut summary = RenewalSummary {
        skipped: store.list().len() - candidates.len(),
        ..Default::default()
    };

    info!(
        due = candidates.len(),
        scheduled = store.list().len(),
        force,
        "Checking renewals"
    );

    let next_due = now + chrono::Duration::seconds(period.as_secs() as i64);

    for renewal in candidates {
        info!(host = %renewal.host, due = %renewal.due, "Renewing certificate");
        match driver.renew(&renewal.target).await {
            Ok(()) => {
                store.upsert(ScheduledRenewal {
                    due: next_due,
                    ..renewal.clone()
                })?;
                summary.renewed.push(renewal.host);
            }
            Err(CertPilotError::Cancelled) => {
                info!(host = %renewal.host, "Renewal pass cancelled");
                summary.failed.push(renewal.host);
                break;
            }
            Err(e) => {
                error!(host = %renewal.host, error = %e, "Renewal failed");
                summary.failed.push(renewal.host);
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcquisitionError;
    use tempfile::TempDir;

    const PERIOD: Duration = Duration::from_secs(60 * 86_400);

    #[derive(Default)]
    struct FakeDriver {
        seen: Vec<String>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl RenewalDriver for FakeDriver {
        async fn renew(&mut self, target: &Target) -> Result<(), CertPilotError> {
            self.seen.push(target.host.clone());
            if self.failing.contains(&target.host) {
                return Err(AcquisitionError::Rejected {
                    status: 429,
                    problem: Some("rateLimited".to_string()),
                }
                .into());
            }
            Ok(())
        }
    }

    fn renewal(host: &str, due: DateTime<Utc>) -> ScheduledRenewal {
        ScheduledRenewal::new(Target::new(host, "Manual").with_web_root("/var/www"), due)
    }

    #[tokio::test]
    async fn test_only_due_entries_are_renewed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renewals.json");
        let now = Utc::now();
        let later = now + chrono::Duration::days(10);

        let mut store = RenewalStore::load(&path).unwrap();
        store.upsert(renewal("due.example.com", now - chrono::Duration::hours(1))).unwrap();
        store.upsert(renewal("later.example.com", later)).unwrap();

        let mut driver = FakeDriver::default();
        let summary = check_renewals(&mut store, &mut driver, now, PERIOD, false).await.unwrap();

        assert_eq!(driver.seen, vec!["due.example.com"]);
        assert_eq!(summary.renewed, vec!["due.example.com"]);
        assert_eq!(summary.skipped, 1);

        let reloaded = RenewalStore::load(&path).unwrap();
        assert_eq!(
            reloaded.get("due.example.com").unwrap().due,
            now + chrono::Duration::days(60)
        );
        assert_eq!(reloaded.get("later.example.com").unwrap().due, later);
    }

    #[test]
    fn test_upsert_keeps_one_entry_per_host() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renewals.json");
        let now = Utc::now();

        let mut store = RenewalStore::load(&path).unwrap();
        store.upsert(renewal("example.com", now)).unwrap();
        store.upsert(renewal("Example.com", now + chrono::Duration::days(5))).unwrap();

        let reloaded = RenewalStore::load(&path).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.list()[0].due, now + chrono::Duration::days(5));
        assert_eq!(reloaded.list()[0].target.web_root.as_deref(), Some("/var/www"));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_pass() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let due = now - chrono::Duration::minutes(5);

        let mut store = RenewalStore::load(dir.path().join("renewals.json")).unwrap();
        store.upsert(renewal("a.example.com", due)).unwrap();
        store.upsert(renewal("b.example.com", due)).unwrap();
        store.upsert(renewal("c.example.com", due)).unwrap();

        let mut driver = FakeDriver {
            failing: vec!["b.example.com".to_string()],
            ..Default::default()
        };
        let summary = check_renewals(&mut store, &mut driver, now, PERIOD, false).await.unwrap();

        assert_eq!(driver.seen.len(), 3);
        assert_eq!(summary.renewed, vec!["a.example.com", "c.example.com"]);
        assert_eq!(summary.failed, vec!["b.example.com"]);
        // The failed entry stays due for the next pass
        assert_eq!(store.get("b.example.com").unwrap().due, due);
    }

    #[tokio::test]
    async fn test_force_renews_everything() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let mut store = RenewalStore::load(dir.path().join("renewals.json")).unwrap();
        store.upsert(renewal("example.com", now + chrono::Duration::days(30))).unwrap();

        let mut driver = FakeDriver::default();
        let summary = check_renewals(&mut store, &mut driver, now, PERIOD, true).await.unwrap();
        assert_eq!(summary.renewed, vec!["example.com"]);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn test_remove_and_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renewals.json");

        let mut store = RenewalStore::load(&path).unwrap();
        store.upsert(renewal("example.com", Utc::now())).unwrap();
        assert!(store.remove("example.com").unwrap());
        assert!(!store.remove("example.com").unwrap());
        assert!(RenewalStore::load(&path).unwrap().list().is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RenewalStore::load(&path),
            Err(RenewalStoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_snapshot_survives_without_live_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renewals.json");
        {
            let target = Target::new("example.com", "FTP")
                .with_web_root("ftp://ftp.example.com/site")
                .with_alternative_names(["example.com", "www.example.com"])
                .with_exclusions(["old.example.com"]);
            let mut store = RenewalStore::load(&path).unwrap();
            store.upsert(ScheduledRenewal::new(target, Utc::now())).unwrap();
        }

        let store = RenewalStore::load(&path).unwrap();
        let target = &store.get("example.com").unwrap().target;
        assert_eq!(target.plugin, "FTP");
        assert_eq!(target.exclude_bindings, vec!["old.example.com"]);
        let hosts: Vec<String> = target
            .resolved_hosts()
            .unwrap()
            .into_iter()
            .map(|h| h.into_string())
            .collect();
        assert_eq!(hosts, vec!["example.com", "www.example.com"]);
    }
}
