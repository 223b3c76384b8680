//! Host command execution used by the shell-backed metric adapters.

use crate::error::{Result, SystemError};
use async_trait::async_trait;
use tokio::process::Command;

/// Runs a program and returns its standard output.
///
/// Adapters reach `vcgencmd`, `df` and `uptime` through this trait so that
/// failures and latency can be injected in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout on a zero exit status.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SystemError::command_error(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SystemError::command_error(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
