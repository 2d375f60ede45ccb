//! `run_pytest`: the test suite as structured JSON instead of raw output.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::errors::ToolError;
use crate::events::types::truncate_chars;

pub const DEFAULT_TIMEOUT_SECS: f64 = 120.0;

/// Report file written by the `pytest-json-report` plugin, relative to cwd.
pub const REPORT_FILE: &str = ".pytest_report.json";

const MAX_FAILURES: usize = 10;
const MAX_STDOUT_CHARS: usize = 3000;
const MAX_LONGREPR_CHARS: usize = 4000;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PytestSummary {
    pub exit_code: i32,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub error: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PytestFailure {
    pub nodeid: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longrepr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PytestRun {
    pub summary: PytestSummary,
    pub failures: Vec<PytestFailure>,
    pub stdout: String,
}

impl PytestRun {
    /// `{summary, failures, stdout}` with failures and stdout capped.
    pub fn render(&self) -> String {
        let failures = &self.failures[..self.failures.len().min(MAX_FAILURES)];
        let body = json!({
            "summary": self.summary,
            "failures": failures,
            "stdout": truncate_chars(&self.stdout, MAX_STDOUT_CHARS),
        });
        serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    summary: ReportSummary,
    #[serde(default)]
    tests: Vec<ReportTest>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportSummary {
    #[serde(default)]
    passed: u64,
    #[serde(default)]
    failed: u64,
    #[serde(default)]
    error: u64,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ReportTest {
    #[serde(default)]
    nodeid: String,
    #[serde(default)]
    outcome: String,
    call: Option<ReportCall>,
}

#[derive(Debug, Deserialize)]
struct ReportCall {
    #[serde(default)]
    longrepr: Option<String>,
}

/// Fold a report into summary counts and failed/errored tests. A missing
/// or unparsable report yields zero counts.
pub fn parse_report(exit_code: i32, raw: Option<&[u8]>) -> (PytestSummary, Vec<PytestFailure>) {
    let report: Report = raw
        .and_then(|bytes| match serde_json::from_slice(bytes) {
            Ok(report) => Some(report),
            Err(e) => {
                debug!(error = %e, "Ignoring unparsable pytest report");
                None
            }
        })
        .unwrap_or_default();

    let summary = PytestSummary {
        exit_code,
        passed: report.summary.passed,
        failed: report.summary.failed,
        error: report.summary.error,
        total: report.summary.total,
    };
    let failures = report
        .tests
        .into_iter()
        .filter(|t| t.outcome == "failed" || t.outcome == "error")
        .map(|t| PytestFailure {
            nodeid: t.nodeid,
            outcome: t.outcome,
            longrepr: t
                .call
                .map(|c| truncate_chars(&c.longrepr.unwrap_or_default(), MAX_LONGREPR_CHARS)),
        })
        .collect();
    (summary, failures)
}

/// `python -m pytest --json-report ...` in `cwd`.
pub async fn run_pytest(cwd: &Path, timeout_secs: f64) -> Result<PytestRun, ToolError> {
    run_pytest_with("python", &[], cwd, timeout_secs).await
}

/// Same as [`run_pytest`] with an explicit interpreter and leading args.
pub async fn run_pytest_with(
    program: &str,
    leading_args: &[&str],
    cwd: &Path,
    timeout_secs: f64,
) -> Result<PytestRun, ToolError> {
    let timeout = Duration::from_secs_f64(timeout_secs.clamp(0.1, 3600.0));
    let report_path = cwd.join(REPORT_FILE);
    remove_report(&report_path).await?;

    let child = tokio::process::Command::new(program)
        .args(leading_args)
        .args(["-m", "pytest", "--json-report"])
        .arg(format!("--json-report-file={}", report_path.display()))
        .args(["--tb=short", "-q", "--no-header"])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ToolError::execution("run_pytest", format!("{} not found", program))
            } else {
                ToolError::execution("run_pytest", format!("failed to spawn: {}", e))
            }
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ToolError::execution("run_pytest", e.to_string())),
        Err(_) => {
            return Err(ToolError::execution(
                "run_pytest",
                format!("pytest timed out after {:.1}s", timeout.as_secs_f64()),
            ));
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let raw = match tokio::fs::read(&report_path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(ToolError::execution("run_pytest", e.to_string())),
    };
    remove_report(&report_path).await?;

    let (summary, failures) = parse_report(exit_code, raw.as_deref());
    debug!(
        exit_code,
        passed = summary.passed,
        failed = summary.failed,
        "pytest finished"
    );
    Ok(PytestRun {
        summary,
        failures,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

async fn remove_report(path: &Path) -> Result<(), ToolError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ToolError::execution("run_pytest", e.to_string())),
    }
}
