//! Recurring renewal-check registration
//!
//! The renewal check runs as a separate short-lived invocation. A
//! [`TaskScheduler`] arranges for the operating system to start it
//! periodically; certpilot never stays resident itself.

use std::path::{Path, PathBuf};

use tracing::info;

use certpilot_common::fs::write_atomic;
use certpilot_config::Config;

use crate::error::SchedulerError;

pub const SERVICE_UNIT: &str = "certpilot-renew.service";
pub const TIMER_UNIT: &str = "certpilot-renew.timer";

/// The invocation to repeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalTask {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl RenewalTask {
    /// Renewal check for the authority and state directory in `config`
    pub fn for_config(executable: PathBuf, config: &Config) -> Self {
        let mut args = vec!["--base-uri".to_string(), config.base_uri.clone()];
        if config.test {
            args.push("--test".to_string());
        }
        args.push("--config-path".to_string());
        args.push(config.config_path.display().to_string());
        args.push("renew".to_string());

        let working_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            executable,
            args,
            working_dir,
        }
    }

    /// Renewal check using the running executable
    pub fn current(config: &Config) -> Result<Self, SchedulerError> {
        let executable = std::env::current_exe().map_err(SchedulerError::Executable)?;
        Ok(Self::for_config(executable, config))
    }

    /// Command line with arguments quoted where needed
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|arg| quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Registers the recurring renewal check with the host system
pub trait TaskScheduler {
    /// Create or replace the registration; returns what was written
    fn register(&self, task: &RenewalTask) -> Result<Vec<PathBuf>, SchedulerError>;
}

/// Writes a systemd service and timer pair
///
/// Enabling the timer (`systemctl enable --now certpilot-renew.timer`) is
/// left to the operator.
#[derive(Debug, Clone)]
pub struct SystemdTimerScheduler {
    unit_dir: PathBuf,
}

impl SystemdTimerScheduler {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    pub fn service_unit(task: &RenewalTask) -> String {
        format!(
            "[Unit]\n\
             Description=certpilot certificate renewal check\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             WorkingDirectory={}\n\
             ExecStart={}\n",
            task.working_dir.display(),
            task.command_line()
        )
    }

    pub fn timer_unit() -> String {
        "[Unit]\n\
         Description=Daily certpilot certificate renewal check\n\
         \n\
         [Timer]\n\
         OnCalendar=daily\n\
         Persistent=true\n\
         RandomizedDelaySec=1h\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n"
            .to_string()
    }
}

impl TaskScheduler for SystemdTimerScheduler {
    fn register(&self, task: &RenewalTask) -> Result<Vec<PathBuf>, SchedulerError> {
        let units = [
            (self.unit_dir.join(SERVICE_UNIT), Self::service_unit(task)),
            (self.unit_dir.join(TIMER_UNIT), Self::timer_unit()),
        ];

        let mut written = Vec::with_capacity(units.len());
        for (path, content) in units {
            write_atomic(&path, content.as_bytes(), Some(0o644)).map_err(|source| SchedulerError::Write {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }

        info!(
            unit_dir = %self.unit_dir.display(),
            command = %task.command_line(),
            "Registered renewal timer"
        );
        Ok(written)
    }
}
