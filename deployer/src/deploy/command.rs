//! External process invocation

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Run `bash -c <command>` inside `cwd`, capturing output.
///
/// The child is killed if the returned future is dropped, so callers can put
/// a deadline on it. On a non-zero exit the error carries the command line and
/// the tail of its stderr (stdout when stderr is empty).
pub async fn run_shell(command: &str, cwd: &Path) -> Result<String, String> {
    let mut cmd = Command::new("bash");
    cmd.current_dir(cwd).args(["-c", command]);
    run(cmd, command).await
}

/// Run a prepared command, see [`run_shell`]
pub async fn run(mut cmd: Command, label: &str) -> Result<String, String> {
    debug!("Running: {}", label);

    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("Failed to run {}: {}", label, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = if stderr.trim().is_empty() {
        tail(&stdout)
    } else {
        tail(&stderr)
    };

    let exit = match output.status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };

    if detail.is_empty() {
        Err(format!("Command failed: {} ({})", label, exit))
    } else {
        Err(format!("Command failed: {} ({})\n{}", label, exit, detail))
    }
}

const TAIL_LINES: usize = 20;

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].join("\n")
}
