use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Runs an external tool to completion and reports how it exited. The
/// transfer tool and the muxer are both driven through this seam.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ExitStatus>;
}

/// Spawns the program with inherited stdio so its progress output reaches the
/// terminal.
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ExitStatus> {
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .status()
            .await
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program} is not available: {reason}")]
    Missing { program: PathBuf, reason: String },
}

/// Asks a tool for its version and returns the first line of what it prints.
pub async fn probe_tool(program: &Path, version_flag: &str) -> Result<String, ToolError> {
    let output = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| ToolError::Missing {
            program: program.to_path_buf(),
            reason: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(ToolError::Missing {
            program: program.to_path_buf(),
            reason: format!("exited with {}", output.status),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
