//! Watch configuration loaded from a TOML file passed via `--config`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WatchError;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_STDERR_TAIL_LINES: usize = 20;

/// Watch-folder configuration (TOML).
///
/// Key names match the operator-facing config of the acquisition pipeline:
/// the compute side is called "massive" and the ledger is `submitted`.
/// The file is read once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    /// Acquisition-facing directory that new images land in.
    pub remote_input_dir: PathBuf,
    /// Acquisition-facing directory that processed results are copied to.
    pub remote_output_dir: PathBuf,
    /// Compute-side directory that inputs are staged into before submission.
    pub massive_input_dir: PathBuf,
    /// Compute-side directory the collaborator writes results into.
    pub massive_output_dir: PathBuf,

    /// Processing executable. Required unless `[pipeline]` is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Launcher placed before the executable (e.g. `srun`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srun_path: Option<String>,
    /// Fixed arguments passed after the executable and before the file path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,

    /// Ledger of already-submitted file names.
    pub submitted: PathBuf,
    /// Idle cycles to wait before the withheld last file is submitted.
    pub delay: u32,
    /// Seconds to sleep between poll cycles.
    pub timeout: u64,

    /// Kill a job that runs longer than this many seconds. Unlimited if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,
    /// Trailing stderr lines kept in a job failure report.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,

    #[serde(rename = "log-level", default = "default_log_level")]
    pub log_level: String,
    #[serde(rename = "log-files", default)]
    pub log_files: LogFiles,

    /// Templated multi-step processing. Replaces `executable` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogFiles {
    /// Log file for the watch loop, in addition to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<PathBuf>,
}

/// Ordered command templates rendered once per submitted file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Inline templates, one command per entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    /// File holding templates, one command per non-empty line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_stderr_tail_lines() -> usize {
    DEFAULT_STDERR_TAIL_LINES
}

impl WatchConfig {
    /// Build a config with the required keys and defaults for the rest.
    pub fn new(
        remote_input_dir: impl Into<PathBuf>,
        remote_output_dir: impl Into<PathBuf>,
        massive_input_dir: impl Into<PathBuf>,
        massive_output_dir: impl Into<PathBuf>,
        submitted: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_input_dir: remote_input_dir.into(),
            remote_output_dir: remote_output_dir.into(),
            massive_input_dir: massive_input_dir.into(),
            massive_output_dir: massive_output_dir.into(),
            executable: None,
            srun_path: None,
            arguments: Vec::new(),
            submitted: submitted.into(),
            delay: 1,
            timeout: 60,
            job_timeout_secs: None,
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
            log_level: default_log_level(),
            log_files: LogFiles::default(),
            pipeline: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    /// Leading argv for a single-command submission: launcher, executable, fixed args.
    pub fn submit_command(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(srun) = self.srun_path.as_deref().filter(|s| !s.trim().is_empty()) {
            argv.push(srun.to_string());
        }
        if let Some(exe) = &self.executable {
            argv.push(exe.clone());
        }
        argv.extend(self.arguments.iter().cloned());
        argv
    }

    /// The four watched directories, labelled by config key.
    pub fn watched_dirs(&self) -> [(&'static str, &Path); 4] {
        [
            ("remote_input_dir", self.remote_input_dir.as_path()),
            ("remote_output_dir", self.remote_output_dir.as_path()),
            ("massive_input_dir", self.massive_input_dir.as_path()),
            ("massive_output_dir", self.massive_output_dir.as_path()),
        ]
    }

    pub fn validate(&self) -> Result<(), WatchError> {
        let mut seen = HashSet::new();
        for (key, dir) in self.watched_dirs() {
            if !dir.is_dir() {
                return Err(WatchError::Config(format!(
                    "{key} {} is not an existing directory",
                    dir.display()
                )));
            }
            let resolved = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
            if !seen.insert(resolved) {
                return Err(WatchError::Config(format!(
                    "{key} {} duplicates another watched directory",
                    dir.display()
                )));
            }
        }

        match &self.pipeline {
            Some(pipeline) => {
                if pipeline.steps.is_empty() && pipeline.template_file.is_none() {
                    return Err(WatchError::Config(
                        "pipeline needs `steps` or `template_file`".to_string(),
                    ));
                }
            }
            None => {
                let has_executable = self
                    .executable
                    .as_deref()
                    .is_some_and(|exe| !exe.trim().is_empty());
                if !has_executable {
                    return Err(WatchError::Config(
                        "missing `executable` (or a `[pipeline]` table)".to_string(),
                    ));
                }
            }
        }

        if self.submitted.as_os_str().is_empty() {
            return Err(WatchError::Config("`submitted` must be a file path".to_string()));
        }
        Ok(())
    }
}

/// Load and validate config from a TOML file.
pub fn load_config(path: &Path) -> Result<WatchConfig, WatchError> {
    debug!(path = %path.display(), "loading config");
    let contents = fs::read_to_string(path)
        .map_err(|err| WatchError::Config(format!("read {}: {err}", path.display())))?;
    parse_config(&contents, path)
}

/// Parse and validate config text. `origin` is only used in error messages.
pub fn parse_config(contents: &str, origin: &Path) -> Result<WatchConfig, WatchError> {
    let cfg: WatchConfig = toml::from_str(contents)
        .map_err(|err| WatchError::Config(format!("parse {}: {err}", origin.display())))?;
    cfg.validate()?;
    Ok(cfg)
}
