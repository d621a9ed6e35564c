//! Subprocess helper shared by the git, compose and tar executors

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last few lines of stderr, for error messages
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(5);
        lines[start..].join("\n")
    }

    /// Human-readable failure description
    pub fn describe_failure(&self, what: &str) -> String {
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let tail = self.stderr_tail();
        if tail.is_empty() {
            format!("{} exited with {}", what, code)
        } else {
            format!("{} exited with {}: {}", what, code, tail)
        }
    }
}

/// Run `program args...` in `cwd` and capture its output.
///
/// Only a failure to spawn is an `Err`; a non-zero exit is reported through
/// [`CommandOutput::success`].
pub async fn run(program: &str, args: &[&str], cwd: &Path) -> std::io::Result<CommandOutput> {
    debug!("Running {} {} in {}", program, args.join(" "), cwd.display());

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
