use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use crate::errors::ToolError;
use crate::events::types::truncate_chars;

pub const DEFAULT_TIMEOUT_SECS: f64 = 60.0;

/// Max characters of rendered command output returned to the model.
const MAX_OUTPUT_CHARS: usize = 8000;

#[derive(Debug, Clone)]
pub struct BashResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl BashResult {
    pub fn render(&self) -> String {
        let text = format!(
            "EXIT CODE: {}\nSTDOUT:\n{}\nSTDERR:\n{}",
            self.exit_code, self.stdout, self.stderr
        );
        truncate_chars(&text, MAX_OUTPUT_CHARS)
    }
}

/// Run `command` through `sh -c` in `cwd`, killing it after `timeout_secs`.
pub async fn bash_exec(
    command: &str,
    cwd: &Path,
    timeout_secs: f64,
) -> Result<BashResult, ToolError> {
    let timeout = Duration::from_secs_f64(timeout_secs.clamp(0.1, 3600.0));

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::execution("bash_exec", format!("failed to spawn: {}", e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(BashResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(e)) => Err(ToolError::execution("bash_exec", e.to_string())),
        // dropping the future drops the child, which kills it
        Err(_) => Err(ToolError::execution(
            "bash_exec",
            format!("Command timed out after {:.1}s", timeout.as_secs_f64()),
        )),
    }
}
