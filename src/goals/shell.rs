//! Goals configured by `.retrai.yml`: an arbitrary check command with
//! success conditions, and a timing threshold.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::json;

use super::command::{CommandRun, run_shell};
use super::{GoalResult, GoalStrategy};
use crate::agent::state::AgentState;
use crate::config::{ProjectConfig, SuccessCondition};
use crate::errors::GoalError;
use crate::events::types::truncate_chars;

const DEFAULT_CHECK_COMMAND: &str = "make check";
const DEFAULT_BENCH_COMMAND: &str = "python bench.py";
const DEFAULT_MAX_SECONDS: f64 = 1.0;
const OUTPUT_DETAIL_CHARS: usize = 3000;

fn with_custom_prompt(config: &ProjectConfig, base: String) -> String {
    match config.system_prompt.as_deref().map(str::trim) {
        Some(custom) if !custom.is_empty() => format!("{}\n\n{}", custom, base),
        _ => base,
    }
}

/// Run `check_command` and test it against `success_condition`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellGoal;

impl ShellGoal {
    /// Each unmet condition, in check order.
    fn failures(
        cond: &SuccessCondition,
        exit_code: i32,
        output: &str,
        elapsed: Duration,
    ) -> Result<Vec<String>, GoalError> {
        let mut failures = Vec::new();
        let expected_exit = cond.exit_code.unwrap_or(0);
        if exit_code != expected_exit {
            failures.push(format!(
                "exit_code={} (expected {})",
                exit_code, expected_exit
            ));
        }
        if let Some(needle) = cond.output_contains.as_deref()
            && !output.contains(needle)
        {
            failures.push(format!("output does not contain {:?}", needle));
        }
        if let Some(pattern) = cond.output_regex.as_deref() {
            let re = RegexBuilder::new(pattern)
                .multi_line(true)
                .build()
                .map_err(|e| GoalError::Misconfigured {
                    goal: "shell-goal".into(),
                    message: format!("invalid output_regex {:?}: {}", pattern, e),
                })?;
            if !re.is_match(output) {
                failures.push(format!("output does not match regex {:?}", pattern));
            }
        }
        if let Some(limit) = cond.max_seconds
            && elapsed.as_secs_f64() > limit
        {
            failures.push(format!(
                "took {:.2}s (limit: {}s)",
                elapsed.as_secs_f64(),
                limit
            ));
        }
        Ok(failures)
    }
}

#[async_trait]
impl GoalStrategy for ShellGoal {
    fn name(&self) -> &str {
        "shell-goal"
    }

    async fn check(&self, _state: &AgentState, cwd: &Path) -> Result<GoalResult, GoalError> {
        let config = ProjectConfig::load_or_default_async(cwd).await;
        let command = config
            .check_command
            .clone()
            .unwrap_or_else(|| DEFAULT_CHECK_COMMAND.to_string());
        let cond = &config.success_condition;
        let timeout = Duration::from_secs_f64(cond.max_seconds.unwrap_or(120.0).max(60.0) * 2.0);

        match run_shell(&command, cwd, timeout).await {
            CommandRun::Completed {
                exit_code,
                stdout,
                stderr,
                elapsed,
            } => {
                let output = format!("{}{}", stdout, stderr);
                let failures = Self::failures(cond, exit_code, &output, elapsed)?;
                if failures.is_empty() {
                    Ok(GoalResult::achieved(
                        format!("Command succeeded in {:.2}s", elapsed.as_secs_f64()),
                        json!({"command": command, "elapsed": elapsed.as_secs_f64()}),
                    ))
                } else {
                    Ok(GoalResult::not_achieved(
                        failures.join("; "),
                        json!({
                            "command": command,
                            "elapsed": elapsed.as_secs_f64(),
                            "exit_code": exit_code,
                            "output": truncate_chars(&output, OUTPUT_DETAIL_CHARS),
                        }),
                    ))
                }
            }
            CommandRun::TimedOut => Ok(GoalResult::not_achieved(
                "Command timed out",
                json!({"command": command}),
            )),
            CommandRun::NotFound | CommandRun::SpawnFailed(_) => Ok(GoalResult::not_achieved(
                "Could not start the check command",
                json!({"command": command}),
            )),
        }
    }

    fn system_prompt(&self, cwd: &Path) -> String {
        let config = ProjectConfig::load_or_default(cwd);
        let command = config
            .check_command
            .as_deref()
            .unwrap_or(DEFAULT_CHECK_COMMAND);
        let conditions =
            serde_json::to_string(&config.success_condition).unwrap_or_else(|_| "{}".into());
        let base = format!(
            "Your goal is to make the command `{}` succeed.\n\
             Success conditions: {}\n\n\
             Strategy:\n\
             1. Run the check command to see the current state.\n\
             2. Read the output and identify what needs to change.\n\
             3. Modify source files (not scripts/configs unless necessary).\n\
             4. Re-run the check command to verify progress.\n\
             5. Repeat until all conditions are met.\n",
            command, conditions
        );
        with_custom_prompt(&config, base)
    }
}

/// Run `check_command` `iterations` times in a row, each under
/// `max_seconds`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfCheckGoal;

#[async_trait]
impl GoalStrategy for PerfCheckGoal {
    fn name(&self) -> &str {
        "perf-check"
    }

    async fn check(&self, _state: &AgentState, cwd: &Path) -> Result<GoalResult, GoalError> {
        let config = ProjectConfig::load_or_default_async(cwd).await;
        let command = config
            .check_command
            .clone()
            .unwrap_or_else(|| DEFAULT_BENCH_COMMAND.to_string());
        let max_seconds = config.max_seconds.unwrap_or(DEFAULT_MAX_SECONDS);
        if max_seconds <= 0.0 {
            return Err(GoalError::Misconfigured {
                goal: "perf-check".into(),
                message: format!("max_seconds must be positive, got {}", max_seconds),
            });
        }
        let passes = config.iterations.unwrap_or(1).max(1);
        let timeout = Duration::from_secs_f64(max_seconds * 10.0);

        let mut times: Vec<f64> = Vec::with_capacity(passes as usize);
        for _ in 0..passes {
            match run_shell(&command, cwd, timeout).await {
                CommandRun::Completed {
                    exit_code,
                    stdout,
                    stderr,
                    elapsed,
                } => {
                    let elapsed = elapsed.as_secs_f64();
                    times.push(elapsed);
                    let output = format!("{}{}", stdout, stderr);
                    if exit_code != 0 {
                        return Ok(GoalResult::not_achieved(
                            format!("Command exited with code {}", exit_code),
                            json!({
                                "command": command,
                                "elapsed": elapsed,
                                "output": truncate_chars(&output, 2000),
                            }),
                        ));
                    }
                    if elapsed > max_seconds {
                        let avg = times.iter().sum::<f64>() / times.len() as f64;
                        return Ok(GoalResult::not_achieved(
                            format!(
                                "Too slow: {:.3}s (limit: {}s, avg so far: {:.3}s)",
                                elapsed, max_seconds, avg
                            ),
                            json!({
                                "command": command,
                                "elapsed": elapsed,
                                "times": times,
                                "output": truncate_chars(&output, 2000),
                            }),
                        ));
                    }
                }
                CommandRun::TimedOut => {
                    return Ok(GoalResult::not_achieved(
                        format!("Command timed out (limit: {}s x 10)", max_seconds),
                        json!({"command": command}),
                    ));
                }
                CommandRun::NotFound | CommandRun::SpawnFailed(_) => {
                    return Ok(GoalResult::not_achieved(
                        "Could not start the benchmark command",
                        json!({"command": command}),
                    ));
                }
            }
        }

        let avg = times.iter().sum::<f64>() / times.len() as f64;
        Ok(GoalResult::achieved(
            format!(
                "Passed {}x consecutive in avg {:.3}s (limit: {}s)",
                passes, avg, max_seconds
            ),
            json!({"command": command, "times": times, "avg": avg}),
        ))
    }

    fn system_prompt(&self, cwd: &Path) -> String {
        let config = ProjectConfig::load_or_default(cwd);
        let command = config
            .check_command
            .as_deref()
            .unwrap_or(DEFAULT_BENCH_COMMAND);
        let max_seconds = config.max_seconds.unwrap_or(DEFAULT_MAX_SECONDS);
        let base = format!(
            "Your goal is to optimise the code so that `{}` completes in under {} seconds.\n\n\
             Strategy:\n\
             1. Run the benchmark to see the current timing.\n\
             2. Profile where the time is spent.\n\
             3. Apply algorithmic improvements first, then implementation details.\n\
             4. Re-run to verify the improvement.\n\
             5. Do NOT break correctness: the command must still exit 0.\n",
            command, max_seconds
        );
        with_custom_prompt(&config, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROJECT_CONFIG_FILE;
    use std::path::PathBuf;

    fn state() -> AgentState {
        AgentState::new("r", "shell-goal", PathBuf::from("."), "m", 3, false)
    }

    fn project(yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), yaml).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_shell_goal_achieved_on_matching_output() {
        let dir = project(
            "check_command: \"echo ALL PASS\"\nsuccess_condition:\n  output_contains: PASS\n",
        );
        let result = ShellGoal.check(&state(), dir.path()).await.unwrap();
        assert!(result.achieved, "{}", result.reason);
    }

    #[tokio::test]
    async fn test_shell_goal_reports_every_failure() {
        let dir = project(
            "check_command: \"echo nope; exit 1\"\nsuccess_condition:\n  output_contains: PASS\n  output_regex: \"^OK\"\n",
        );
        let result = ShellGoal.check(&state(), dir.path()).await.unwrap();
        assert!(!result.achieved);
        assert!(result.reason.contains("exit_code=1 (expected 0)"));
        assert!(result.reason.contains("does not contain"));
        assert!(result.reason.contains("does not match regex"));
    }

    #[tokio::test]
    async fn test_shell_goal_custom_exit_code() {
        let dir = project("check_command: \"exit 3\"\nsuccess_condition:\n  exit_code: 3\n");
        let result = ShellGoal.check(&state(), dir.path()).await.unwrap();
        assert!(result.achieved);
    }

    #[tokio::test]
    async fn test_shell_goal_invalid_regex_is_goal_error() {
        let dir = project(
            "check_command: \"echo hi\"\nsuccess_condition:\n  output_regex: \"(unclosed\"\n",
        );
        let err = ShellGoal.check(&state(), dir.path()).await.unwrap_err();
        assert!(matches!(err, GoalError::Misconfigured { .. }));
    }

    #[test]
    fn test_shell_goal_prompt_includes_custom_text() {
        let dir = project("check_command: \"make lint\"\nsystem_prompt: Keep it tidy.\n");
        let prompt = ShellGoal.system_prompt(dir.path());
        assert!(prompt.starts_with("Keep it tidy."));
        assert!(prompt.contains("`make lint`"));
    }

    #[tokio::test]
    async fn test_perf_check_passes_fast_command() {
        let dir = project("check_command: \"true\"\nmax_seconds: 5\niterations: 2\n");
        let result = PerfCheckGoal.check(&state(), dir.path()).await.unwrap();
        assert!(result.achieved, "{}", result.reason);
        assert_eq!(result.details["times"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_perf_check_fails_nonzero_exit() {
        let dir = project("check_command: \"exit 4\"\nmax_seconds: 5\n");
        let result = PerfCheckGoal.check(&state(), dir.path()).await.unwrap();
        assert!(!result.achieved);
        assert_eq!(result.reason, "Command exited with code 4");
    }
}
