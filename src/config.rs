//! Configuration for runs, projects and the server.
//!
//! - [`RunConfig`]: one run's parameters, validated before a run is created.
//! - [`ProjectConfig`]: the project-local `.retrai.yml`, read only by goal
//!   strategies.
//! - [`ServerSettings`]: layered defaults → environment → CLI flags.
//!
//! # Project file format
//!
//! ```yaml
//! goal: shell-goal
//! check_command: "make check"
//! success_condition:
//!   exit_code: 0
//!   output_contains: "PASS"
//!   output_regex: "^OK"
//!   max_seconds: 10
//! system_prompt: |
//!   Optimise the code until 'make check' outputs PASS.
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::OrchestratorError;
use crate::events::DEFAULT_CAPACITY;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-6";
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
pub const PROJECT_CONFIG_FILE: &str = ".retrai.yml";

/// Parameters of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub goal: String,
    #[serde(default = "default_cwd")]
    pub cwd: PathBuf,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub hitl_enabled: bool,
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl RunConfig {
    pub fn new(goal: &str) -> Self {
        Self {
            goal: goal.to_string(),
            cwd: default_cwd(),
            model: default_model(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            hitl_enabled: false,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_hitl(mut self, enabled: bool) -> Self {
        self.hitl_enabled = enabled;
        self
    }

    /// Check the iteration bound and normalise `cwd` to an absolute,
    /// existing directory.
    pub fn validate(mut self) -> Result<Self, OrchestratorError> {
        if self.max_iterations < 1 {
            return Err(OrchestratorError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "model must not be empty".into(),
            ));
        }
        let cwd = std::fs::canonicalize(&self.cwd).map_err(|e| {
            OrchestratorError::InvalidConfig(format!(
                "working directory {} is not accessible: {}",
                self.cwd.display(),
                e
            ))
        })?;
        if !cwd.is_dir() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "working directory {} is not a directory",
                cwd.display()
            )));
        }
        self.cwd = cwd;
        Ok(self)
    }
}

/// Success conditions for `shell-goal`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessCondition {
    /// Required exit code; 0 when unset.
    pub exit_code: Option<i32>,
    pub output_contains: Option<String>,
    pub output_regex: Option<String>,
    pub max_seconds: Option<f64>,
}

/// Contents of `.retrai.yml`. Every field is optional; each goal applies
/// its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub goal: Option<String>,
    pub check_command: Option<String>,
    #[serde(default)]
    pub success_condition: SuccessCondition,
    /// perf-check: per-pass time limit.
    pub max_seconds: Option<f64>,
    /// perf-check: consecutive passes required.
    pub iterations: Option<u32>,
    /// sql-benchmark: local database file, relative to the project.
    pub database: Option<String>,
    /// sql-benchmark: SQLAlchemy-style URL such as `sqlite:///app.db`;
    /// `database` wins when both are set.
    pub dsn: Option<String>,
    pub query: Option<String>,
    pub query_file: Option<String>,
    pub max_ms: Option<f64>,
    pub expected_rows: Option<usize>,
    pub system_prompt: Option<String>,
}

impl ProjectConfig {
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse .retrai.yml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `<project_dir>/.retrai.yml`, falling back to defaults when the
    /// file is missing or malformed.
    pub fn load_or_default(project_dir: &Path) -> Self {
        let path = project_dir.join(PROJECT_CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        Self::or_default(Self::load(&path), &path)
    }

    /// [`load_or_default`](Self::load_or_default) on the async runtime's
    /// file API, for goal checks.
    pub async fn load_or_default_async(project_dir: &Path) -> Self {
        let path = project_dir.join(PROJECT_CONFIG_FILE);
        let loaded = match tokio::fs::read_to_string(&path).await {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to read {}", path.display()))),
        };
        Self::or_default(loaded, &path)
    }

    fn or_default(loaded: Result<Self>, path: &Path) -> Self {
        match loaded {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "Ignoring malformed project config");
                Self::default()
            }
        }
    }

    /// sql-benchmark database setting, `database` before `dsn`.
    pub fn database_target(&self) -> Option<&str> {
        self.database.as_deref().or(self.dsn.as_deref())
    }

    pub fn exists_in(project_dir: &Path) -> bool {
        project_dir.join(PROJECT_CONFIG_FILE).exists()
    }
}

/// Settings for `retrai serve`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub event_capacity: usize,
    /// File-backed checkpoints when set; in-memory otherwise.
    pub checkpoint_dir: Option<PathBuf>,
    pub event_log: Option<PathBuf>,
    /// Permissive CORS for a separately served frontend.
    pub dev_mode: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            event_capacity: DEFAULT_CAPACITY,
            checkpoint_dir: None,
            event_log: None,
            dev_mode: false,
        }
    }
}

impl ServerSettings {
    /// Defaults overlaid with `RETRAI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(host) = lookup("RETRAI_HOST") {
            settings.host = host;
        }
        if let Some(port) = lookup("RETRAI_PORT") {
            settings.port = port
                .parse()
                .with_context(|| format!("RETRAI_PORT is not a valid port: {}", port))?;
        }
        if let Some(capacity) = lookup("RETRAI_EVENT_CAPACITY") {
            settings.event_capacity = capacity
                .parse()
                .with_context(|| format!("RETRAI_EVENT_CAPACITY is not a number: {}", capacity))?;
        }
        if let Some(dir) = lookup("RETRAI_CHECKPOINT_DIR") {
            settings.checkpoint_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup("RETRAI_EVENT_LOG") {
            settings.event_log = Some(PathBuf::from(path));
        }
        Ok(settings)
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}
