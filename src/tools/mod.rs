//! Tool registry: the actions the model may request.
//!
//! [`ToolRegistry`] is the seam the `act` node calls through.
//! [`BuiltinTools`] provides shell, filesystem and pytest tools rooted at the
//! run's working directory.

pub mod fs;
pub mod pytest;
pub mod shell;

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::errors::ToolError;
use crate::provider::ToolSpec;

#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Tools offered to the model on every `plan` call.
    fn catalogue(&self) -> Vec<ToolSpec>;

    /// Execute one tool. `Err(UnknownTool | Execution)` is reported back
    /// to the model; `Err(Fatal)` fails the run.
    async fn invoke(&self, name: &str, args: &Value, cwd: &Path) -> Result<String, ToolError>;
}

/// `bash_exec`, `file_read`, `file_list`, `file_write`, `run_pytest`.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTools;

impl BuiltinTools {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRegistry for BuiltinTools {
    fn catalogue(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "bash_exec".into(),
                description: "Execute a shell command in the project directory. \
                              Use for running tests, installing packages, etc."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "The shell command to run"},
                        "timeout": {
                            "type": "number",
                            "description": "Timeout in seconds (default 60)",
                            "default": 60
                        }
                    },
                    "required": ["command"]
                }),
            },
            ToolSpec {
                name: "file_read".into(),
                description: "Read the contents of a file (path relative to project root)".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to project root"}
                    },
                    "required": ["path"]
                }),
            },
            ToolSpec {
                name: "file_list".into(),
                description: "List files and directories at a path relative to project root"
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Directory path relative to project root (default '.')",
                            "default": "."
                        }
                    },
                    "required": []
                }),
            },
            ToolSpec {
                name: "file_write".into(),
                description: "Write content to a file (path relative to project root). \
                              Creates parent dirs."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to project root"},
                        "content": {"type": "string", "description": "Full file content to write"}
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolSpec {
                name: "run_pytest".into(),
                description: "Run the pytest test suite and return structured results with failures"
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        ]
    }

    async fn invoke(&self, name: &str, args: &Value, cwd: &Path) -> Result<String, ToolError> {
        match name {
            "bash_exec" => {
                let command = required_str(name, args, "command")?;
                let timeout = args
                    .get("timeout")
                    .and_then(Value::as_f64)
                    .unwrap_or(shell::DEFAULT_TIMEOUT_SECS);
                let result = shell::bash_exec(command, cwd, timeout).await?;
                Ok(result.render())
            }
            "file_read" => {
                let path = required_str(name, args, "path")?;
                fs::file_read(path, cwd).await
            }
            "file_list" => {
                let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
                Ok(fs::file_list(path, cwd).await?.join("\n"))
            }
            "file_write" => {
                let path = required_str(name, args, "path")?;
                let content = required_str(name, args, "content")?;
                let written = fs::file_write(path, content, cwd).await?;
                Ok(format!("Written: {}", written.display()))
            }
            "run_pytest" => {
                let run = pytest::run_pytest(cwd, pytest::DEFAULT_TIMEOUT_SECS).await?;
                Ok(run.render())
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn required_str<'a>(tool: &str, args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::execution(tool, format!("missing required argument '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_names() {
        let names: Vec<String> = BuiltinTools::new()
            .catalogue()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            names,
            ["bash_exec", "file_read", "file_list", "file_write", "run_pytest"]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuiltinTools::new()
            .invoke("launch_rocket", &json!({}), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "launch_rocket"));
    }

    #[tokio::test]
    async fn test_missing_argument_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuiltinTools::new()
            .invoke("file_read", &json!({}), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_run_pytest_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let result = BuiltinTools::new()
            .invoke("run_pytest", &json!({}), dir.path())
            .await;
        // Without python only the spawn fails; with it an empty dir has no tests.
        match result {
            Ok(out) => {
                let body: Value = serde_json::from_str(&out).unwrap();
                assert_ne!(body["summary"]["exit_code"], 0);
                assert!(body["failures"].as_array().unwrap().is_empty());
            }
            Err(err) => assert!(
                matches!(err, ToolError::Execution { ref tool, .. } if tool == "run_pytest")
            ),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let tools = BuiltinTools::new();
        let out = tools
            .invoke(
                "file_write",
                &json!({"path": "pkg/mod.py", "content": "x = 1\n"}),
                dir.path(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Written: "));

        let content = tools
            .invoke("file_read", &json!({"path": "pkg/mod.py"}), dir.path())
            .await
            .unwrap();
        assert_eq!(content, "x = 1\n");

        let listing = tools
            .invoke("file_list", &json!({}), dir.path())
            .await
            .unwrap();
        assert_eq!(listing, "pkg/");
    }
}
