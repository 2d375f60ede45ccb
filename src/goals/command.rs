//! Goals decided by a single test-runner command's exit status.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use super::{GoalResult, GoalStrategy};
use crate::agent::state::AgentState;
use crate::errors::GoalError;
use crate::events::types::truncate_chars;

const STDOUT_DETAIL_CHARS: usize = 2000;
const STDERR_DETAIL_CHARS: usize = 1000;

/// Outcome of running a check command to completion (or not).
#[derive(Debug, Clone)]
pub enum CommandRun {
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
    TimedOut,
    NotFound,
    SpawnFailed(String),
}

/// Run `program args..` in `cwd` with a timeout.
pub async fn run_argv(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> CommandRun {
    let mut cmd = Command::new(program);
    cmd.args(args);
    capture(cmd, cwd, timeout).await
}

/// Run a shell command line through `sh -c` in `cwd` with a timeout.
pub async fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> CommandRun {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    capture(cmd, cwd, timeout).await
}

async fn capture(mut cmd: Command, cwd: &Path, timeout: Duration) -> CommandRun {
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CommandRun::NotFound,
        Err(e) => return CommandRun::SpawnFailed(e.to_string()),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => CommandRun::Completed {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        },
        Ok(Err(e)) => CommandRun::SpawnFailed(e.to_string()),
        Err(_) => CommandRun::TimedOut,
    }
}

/// Last non-empty line of `text`, usually a runner's summary line.
fn summary_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|l| !l.is_empty())
}

/// A test-runner goal: achieved when the command exits 0.
#[derive(Debug, Clone)]
pub struct CommandGoal {
    name: &'static str,
    program: &'static str,
    args: &'static [&'static str],
    timeout: Duration,
    /// Human label used in reasons, e.g. "cargo tests".
    label: &'static str,
    install_hint: &'static str,
    /// Exit codes meaning "nothing was tested" rather than "tests failed".
    no_tests_exit_code: Option<i32>,
    prompt: &'static str,
}

impl CommandGoal {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program)
            .chain(self.args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn interpret(&self, run: CommandRun) -> GoalResult {
        let command = self.command_line();
        match run {
            CommandRun::TimedOut => GoalResult::not_achieved(
                format!("{} timed out after {}s", command, self.timeout.as_secs()),
                json!({"command": command, "error": "timeout"}),
            ),
            CommandRun::NotFound => GoalResult::not_achieved(
                format!("{} not found. {}", self.program, self.install_hint),
                json!({"command": command, "error": "not_found"}),
            ),
            CommandRun::SpawnFailed(e) => GoalResult::not_achieved(
                format!("Failed to run {}: {}", command, e),
                json!({"command": command, "error": e}),
            ),
            CommandRun::Completed {
                exit_code,
                stdout,
                stderr,
                elapsed,
            } => {
                let details = json!({
                    "command": command,
                    "exit_code": exit_code,
                    "elapsed": elapsed.as_secs_f64(),
                    "stdout": truncate_chars(&stdout, STDOUT_DETAIL_CHARS),
                    "stderr": truncate_chars(&stderr, STDERR_DETAIL_CHARS),
                });
                if exit_code == 0 {
                    let reason = match summary_line(&stdout) {
                        Some(line) => format!("All {} passed ({})", self.label, line),
                        None => format!("All {} passed", self.label),
                    };
                    GoalResult::achieved(reason, details)
                } else if Some(exit_code) == self.no_tests_exit_code {
                    GoalResult::not_achieved("No tests were collected", details)
                } else {
                    let summary = summary_line(&stdout).or_else(|| summary_line(&stderr));
                    let reason = match summary {
                        Some(line) => format!(
                            "{} failed (exit code {}): {}",
                            self.label, exit_code, line
                        ),
                        None => format!("{} failed (exit code {})", self.label, exit_code),
                    };
                    GoalResult::not_achieved(reason, details)
                }
            }
        }
    }
}

#[async_trait]
impl GoalStrategy for CommandGoal {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self, _state: &AgentState, cwd: &Path) -> Result<GoalResult, GoalError> {
        let run = run_argv(self.program, self.args, cwd, self.timeout).await;
        Ok(self.interpret(run))
    }

    fn system_prompt(&self, _cwd: &Path) -> String {
        self.prompt.to_string()
    }
}

/// The builtin test-runner goals.
pub fn presets() -> Vec<CommandGoal> {
    vec![
        CommandGoal {
            name: "pytest",
            program: "python",
            args: &["-m", "pytest", "--tb=short", "-q", "--no-header"],
            timeout: Duration::from_secs(120),
            label: "pytest tests",
            install_hint: "Install Python and pytest in the project environment.",
            no_tests_exit_code: Some(5),
            prompt: "Your goal is to make ALL pytest tests pass in the project.\n\
                Strategy:\n\
                1. Scan the project structure (list files, read pyproject.toml/setup.py).\n\
                2. Run pytest to see the current state of tests.\n\
                3. Read failing test files and the source files they test.\n\
                4. Fix the source code (not the tests, unless tests are genuinely wrong).\n\
                5. Re-run pytest to verify the fix.\n\
                6. Repeat until all tests pass.\n\n\
                Rules:\n\
                - Make minimal targeted changes.\n\
                - If stuck after 3 attempts on the same failure, try a different approach.\n",
        },
        CommandGoal {
            name: "pyright",
            program: "pyright",
            args: &[],
            timeout: Duration::from_secs(120),
            label: "pyright checks",
            install_hint: "Install it with: pip install pyright",
            no_tests_exit_code: None,
            prompt: "Your goal is to fix ALL pyright type errors in the project.\n\
                Strategy:\n\
                1. Run `pyright` to list the current errors.\n\
                2. Read each file with errors and fix the annotations or the code.\n\
                3. Prefer precise types over `Any` and over `# type: ignore`.\n\
                4. Re-run `pyright` until it reports 0 errors.\n",
        },
        CommandGoal {
            name: "cargo-test",
            program: "cargo",
            args: &["test"],
            timeout: Duration::from_secs(300),
            label: "cargo tests",
            install_hint: "Is Rust installed?",
            no_tests_exit_code: None,
            prompt: "Your goal is to make ALL cargo tests pass in the project.\n\
                Strategy:\n\
                1. Scan the project (list files, read Cargo.toml).\n\
                2. Run `cargo build` to find compilation errors first.\n\
                3. Run `cargo test` to see the current state.\n\
                4. Fix the source code (not the tests, unless the test is wrong).\n\
                5. Re-run `cargo test` until all tests pass.\n\n\
                Rules:\n\
                - Fix compilation errors before test failures.\n\
                - Make minimal targeted changes.\n",
        },
        CommandGoal {
            name: "go-test",
            program: "go",
            args: &["test", "./...", "-count=1"],
            timeout: Duration::from_secs(300),
            label: "go tests",
            install_hint: "Is Go installed?",
            no_tests_exit_code: None,
            prompt: "Your goal is to make ALL `go test ./...` tests pass.\n\
                Strategy:\n\
                1. Read go.mod and list the packages.\n\
                2. Run `go vet ./...` and `go test ./...`.\n\
                3. Fix the failing packages, starting with build errors.\n\
                4. Re-run until everything passes.\n",
        },
        CommandGoal {
            name: "npm-test",
            program: "npm",
            args: &["test", "--", "--passWithNoTests"],
            timeout: Duration::from_secs(180),
            label: "npm tests",
            install_hint: "Is Node.js installed?",
            no_tests_exit_code: None,
            prompt: "Your goal is to make ALL tests pass via `npm test`.\n\
                Strategy:\n\
                1. Read package.json to learn the test runner.\n\
                2. Run `npm test` to see the failures.\n\
                3. Fix the source code the failing tests exercise.\n\
                4. Re-run `npm test` until it passes.\n",
        },
        CommandGoal {
            name: "bun-test",
            program: "bun",
            args: &["test"],
            timeout: Duration::from_secs(120),
            label: "bun tests",
            install_hint: "Install it from https://bun.sh",
            no_tests_exit_code: None,
            prompt: "Your goal is to make ALL `bun test` tests pass.\n\
                Strategy:\n\
                1. Read package.json and the test files.\n\
                2. Run `bun test` to see the failures.\n\
                3. Fix the source code, not the tests.\n\
                4. Re-run `bun test` until it passes.\n",
        },
        CommandGoal {
            name: "make-test",
            program: "make",
            args: &["test"],
            timeout: Duration::from_secs(300),
            label: "make test targets",
            install_hint: "Is make installed?",
            no_tests_exit_code: None,
            prompt: "Your goal is to make `make test` succeed.\n\
                Strategy:\n\
                1. Read the Makefile to see what the test target runs.\n\
                2. Run `make test` and read the output.\n\
                3. Fix the code causing the failures.\n\
                4. Re-run `make test` until it exits 0.\n",
        },
    ]
}

pub const EVAL_HARNESS: &str = ".retrai/eval_harness.py";

/// Runs a previously generated evaluation harness with pytest.
#[derive(Debug, Clone)]
pub struct AiEvalGoal {
    timeout: Duration,
}

impl AiEvalGoal {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

impl Default for AiEvalGoal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GoalStrategy for AiEvalGoal {
    fn name(&self) -> &str {
        "ai-eval"
    }

    async fn check(&self, _state: &AgentState, cwd: &Path) -> Result<GoalResult, GoalError> {
        if !tokio::fs::try_exists(cwd.join(EVAL_HARNESS)).await.unwrap_or(false) {
            return Ok(GoalResult::not_achieved(
                format!("No eval harness found at {}", EVAL_HARNESS),
                json!({"error": "no_harness"}),
            ));
        }
        let run = run_argv(
            "python",
            &["-m", "pytest", EVAL_HARNESS, "--tb=short", "-q", "--no-header"],
            cwd,
            self.timeout,
        )
        .await;
        let result = match run {
            CommandRun::Completed {
                exit_code: 0,
                stdout,
                ..
            } => GoalResult::achieved(
                "All eval harness tests passed",
                json!({"stdout": truncate_chars(&stdout, STDOUT_DETAIL_CHARS)}),
            ),
            CommandRun::Completed {
                exit_code, stdout, ..
            } => GoalResult::not_achieved(
                format!(
                    "Eval harness failed (exit code {}): {}",
                    exit_code,
                    summary_line(&stdout).unwrap_or("no output")
                ),
                json!({"exit_code": exit_code, "stdout": truncate_chars(&stdout, STDOUT_DETAIL_CHARS)}),
            ),
            CommandRun::TimedOut => GoalResult::not_achieved(
                format!("eval harness timed out after {}s", self.timeout.as_secs()),
                json!({"error": "timeout"}),
            ),
            CommandRun::NotFound => GoalResult::not_achieved(
                "python not found in the project environment",
                json!({"error": "not_found"}),
            ),
            CommandRun::SpawnFailed(e) => GoalResult::not_achieved(
                format!("Failed to run eval harness: {}", e),
                json!({"error": e}),
            ),
        };
        Ok(result)
    }

    fn system_prompt(&self, _cwd: &Path) -> String {
        format!(
            "Your goal is to make every test in the evaluation harness `{}` pass.\n\
             Strategy:\n\
             1. Read the harness to understand the expected behaviour.\n\
             2. Run it with `python -m pytest {} -q`.\n\
             3. Implement or fix the project code the harness exercises.\n\
             4. Do NOT edit the harness itself.\n\
             5. Re-run until all harness tests pass.\n",
            EVAL_HARNESS, EVAL_HARNESS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn state() -> AgentState {
        AgentState::new("r", "g", PathBuf::from("."), "m", 3, false)
    }

    fn goal(name: &str) -> CommandGoal {
        presets().into_iter().find(|g| g.name == name).unwrap()
    }

    fn completed(exit_code: i32, stdout: &str) -> CommandRun {
        CommandRun::Completed {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_exit_zero_is_achieved() {
        let result = goal("cargo-test").interpret(completed(0, "test result: ok. 3 passed\n"));
        assert!(result.achieved);
        assert!(result.reason.contains("3 passed"));
        assert_eq!(result.details["exit_code"], 0);
    }

    #[test]
    fn test_nonzero_exit_is_not_achieved_with_summary() {
        let result = goal("pytest").interpret(completed(1, "F.\n1 failed, 1 passed in 0.1s\n"));
        assert!(!result.achieved);
        assert!(result.reason.contains("1 failed, 1 passed"));
    }

    #[test]
    fn test_pytest_no_tests_collected() {
        let result = goal("pytest").interpret(completed(5, "no tests ran"));
        assert!(!result.achieved);
        assert_eq!(result.reason, "No tests were collected");
    }

    #[test]
    fn test_missing_binary_is_not_achieved() {
        let result = goal("go-test").interpret(CommandRun::NotFound);
        assert!(!result.achieved);
        assert_eq!(result.details["error"], "not_found");
    }

    #[test]
    fn test_timeout_is_not_achieved() {
        let result = goal("make-test").interpret(CommandRun::TimedOut);
        assert!(!result.achieved);
        assert!(result.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_shell_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        match run_shell("echo hi; exit 2", dir.path(), Duration::from_secs(10)).await {
            CommandRun::Completed {
                exit_code, stdout, ..
            } => {
                assert_eq!(exit_code, 2);
                assert_eq!(stdout.trim(), "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_argv_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_argv(
            "retrai-no-such-binary",
            &[],
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(run, CommandRun::NotFound));
    }

    #[tokio::test]
    async fn test_ai_eval_without_harness() {
        let dir = tempfile::tempdir().unwrap();
        let result = AiEvalGoal::new().check(&state(), dir.path()).await.unwrap();
        assert!(!result.achieved);
        assert_eq!(result.details["error"], "no_harness");
    }
}
