//! Startup checks module for Gondola
//!
//! Verifies the external tools before the daemon touches any file:
//! - ffmpeg and ffprobe must run (`-version`), otherwise startup aborts
//! - lsof is optional; without it every file is treated as complete

use crate::runner::{Invocation, ProcessRunner};
use gondola_config::{Config, ExclusivityMode};
use std::time::Duration;
use thiserror::Error;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },
}

/// Pull the version token out of `ffmpeg -version` / `ffprobe -version`.
///
/// Handles both release builds ("ffmpeg version 6.1.1 ...") and git builds
/// ("ffmpeg version n6.1-3-g...").
pub fn parse_tool_version(version_output: &str) -> Option<String> {
    let line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;
    let lower = line.to_lowercase();
    let at = lower.find(" version ")? + " version ".len();
    let token = line[at..].split_whitespace().next()?;
    Some(token.trim_start_matches('n').to_string())
}

/// Run `<program> -version` and return the reported version.
async fn check_tool(runner: &dyn ProcessRunner, program: &str) -> Result<String, StartupError> {
    let invocation = Invocation::new(program)
        .arg("-version")
        .timeout(VERSION_CHECK_TIMEOUT);

    let output = runner
        .run(&invocation)
        .await
        .map_err(|e| StartupError::ToolUnavailable {
            tool: program.to_string(),
            reason: format!("{}; is it installed and in PATH?", e),
        })?;

    if !output.success {
        return Err(StartupError::ToolUnavailable {
            tool: program.to_string(),
            reason: format!("`{} -version` exited with {:?}", program, output.exit_code),
        });
    }

    Ok(parse_tool_version(&output.stdout).unwrap_or_else(|| "unknown".to_string()))
}

/// Run all startup checks.
///
/// ffmpeg and ffprobe are required. A missing lsof only warns, since the
/// exclusivity gate already fails open when it cannot run.
pub async fn run_startup_checks(runner: &dyn ProcessRunner, config: &Config) -> Result<(), StartupError> {
    for program in [&config.tools.ffmpeg, &config.tools.ffprobe] {
        let version = check_tool(runner, program).await?;
        tracing::info!(tool = %program, version = %version, "Found tool");
    }

    if config.exclusivity.mode == ExclusivityMode::FailOpen {
        tracing::warn!("Exclusivity check disabled, lsof not required");
        return Ok(());
    }

    let lsof = Invocation::new(&config.tools.lsof)
        .arg("-v")
        .timeout(VERSION_CHECK_TIMEOUT);
    // `lsof -v` exits non-zero on some builds, so only a spawn failure counts.
    if let Err(e) = runner.run(&lsof).await {
        tracing::warn!(
            tool = %config.tools.lsof,
            error = %e,
            "lsof not available, files will be treated as complete without checking"
        );
    }

    Ok(())
}
