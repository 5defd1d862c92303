//! Exclusivity gate.
//!
//! Decides whether a freshly dropped file is still being written by another
//! process (typically a copy or scp in progress). The check asks lsof for
//! the access mode and lock status of every open handle on the file.
//!
//! The answer is advisory: a writer may reopen the file the moment after we
//! look. Later stage or probe failures are handled by quarantine.

use crate::runner::{Invocation, ProcessRunner};
use gondola_config::{Config, ExclusivityMode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Access-mode codes (`a` field) that mean another process is writing.
const WRITE_ACCESS: &[&str] = &["w", "u"];
/// Lock codes (`l` field) that mean another process holds a write lock.
const WRITE_LOCKS: &[&str] = &["w", "W", "u"];

/// Returns true when lsof field output shows a foreign process writing to
/// or write-locking the file.
///
/// # Arguments
/// * `output` - stdout of `lsof -Fpal <path>`
/// * `own_pid` - our own process id; its handles are ignored
pub fn held_for_writing(output: &str, own_pid: u32) -> bool {
    let mut current_pid: Option<u32> = None;

    for line in output.lines() {
        let line = line.trim_end();
        let mut chars = line.chars();
        let Some(field) = chars.next() else {
            continue;
        };
        let value = chars.as_str();

        match field {
            'p' => current_pid = value.parse().ok(),
            'a' | 'l' if current_pid == Some(own_pid) => {}
            'a' if WRITE_ACCESS.contains(&value) => return true,
            'l' if WRITE_LOCKS.contains(&value) => return true,
            _ => {}
        }
    }

    false
}

/// Checks whether files can be taken over exclusively.
pub struct ExclusivityGate {
    runner: Arc<dyn ProcessRunner>,
    mode: ExclusivityMode,
    lsof: String,
    via_sudo: bool,
    timeout: Duration,
    own_pid: u32,
}

impl ExclusivityGate {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &Config) -> Self {
        Self {
            runner,
            mode: config.exclusivity.mode,
            lsof: config.tools.lsof.clone(),
            via_sudo: config.tools.lsof_via_sudo,
            timeout: Duration::from_secs(config.timeouts.lsof_secs),
            own_pid: std::process::id(),
        }
    }

    /// Build the lsof invocation, wrapped in non-interactive sudo if configured.
    pub fn invocation(&self, path: &Path) -> Invocation {
        let inv = if self.via_sudo {
            Invocation::new("sudo").arg("-n").arg(&self.lsof)
        } else {
            Invocation::new(&self.lsof)
        };
        inv.arg("-Fpal")
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
    }

    /// Returns true when no other process appears to be writing the file.
    ///
    /// Never fails closed: if lsof cannot be run the file is reported as
    /// available and a warning is logged.
    pub async fn is_exclusively_available(&self, path: &Path) -> bool {
        if self.mode == ExclusivityMode::FailOpen {
            tracing::warn!(
                path = %path.display(),
                "Exclusivity check disabled (fail_open), assuming file is complete"
            );
            return true;
        }

        // lsof exits 1 when nobody has the file open, so the status is not checked.
        let output = match self.runner.run(&self.invocation(path)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "lsof unavailable, assuming file is complete"
                );
                return true;
            }
        };

        if held_for_writing(&output.stdout, self.own_pid) {
            tracing::info!(
                path = %path.display(),
                "Another process has the file open for writing, likely still being copied"
            );
            false
        } else {
            tracing::debug!(path = %path.display(), "No other writer holds the file");
            true
        }
    }
}
