//! External command execution.
//!
//! Commands are spawned directly with an argument vector (no shell), so
//! arguments never need quoting.

use std::process::Stdio;
use tokio::process::Command;

use crate::error::{ShellError, ShellResult};

/// Path to `virsh`, used to enumerate running domains and their interfaces.
pub const VIRSH_CMD: &str = "/usr/bin/virsh";

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ")
}

/// Runs `program` with `args` and captures its output.
///
/// A non-zero exit is not an error here; see [`run_checked`].
pub async fn run(program: &str, args: &[&str]) -> ShellResult<ExecResult> {
    let command = render(program, args);
    tracing::debug!(command = %command, "Executing command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ShellError::Exec { command: command.clone(), source: e })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(
            command = %command,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs a command and returns its stdout, failing on a non-zero exit.
pub async fn run_checked(program: &str, args: &[&str]) -> ShellResult<String> {
    let result = run(program, args).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(ShellError::CommandFailed {
            command: render(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
