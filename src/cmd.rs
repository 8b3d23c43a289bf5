//! Blocking wrappers around the system tools a provisioning run
//! drives: apt-get, ufw, git, pip, nginx, certbot and systemctl.

use std::io;
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{ProvisionError, ProvisionResult};

/// Run a query such as `id -u` and return its trimmed stdout. The
/// tool's stderr is kept out of the progress output and only logged
/// at debug level when the query fails.
pub fn run(program: &str, args: &[&str]) -> ProvisionResult<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| launch_error(program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            command = %format_command(program, args),
            stderr = %stderr.trim(),
            "query failed"
        );
    }
    check(program, args, output.status)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a provisioning step on the operator's terminal. apt-get,
/// pip and certbot print their own progress, and certbot may ask
/// questions, so all three standard streams are inherited.
pub fn run_interactive(program: &str, args: &[&str]) -> ProvisionResult<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| launch_error(program, e))?;
    check(program, args, status)
}

/// Whether `program` resolves on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Shell-style rendering of a command line, as shown in dry-run
/// action lists and `command failed` errors.
#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn check(program: &str, args: &[&str], status: ExitStatus) -> ProvisionResult<()> {
    if status.success() {
        return Ok(());
    }
    let command = format_command(program, args);
    tracing::debug!(%command, code = ?status.code(), "command exited with failure");
    Err(ProvisionError::CommandFailed { command, status })
}

/// A tool that is not installed is reported by name; anything else
/// is an I/O failure.
fn launch_error(program: &str, e: io::Error) -> ProvisionError {
    if e.kind() == io::ErrorKind::NotFound {
        ProvisionError::CommandNotFound(program.to_string())
    } else {
        ProvisionError::Io(e)
    }
}
