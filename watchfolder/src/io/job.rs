//! Job runner abstraction for the processing collaborator.
//!
//! The [`JobRunner`] trait decouples the watch loop from how a file is
//! processed. Production uses [`CommandJobRunner`] (one external command) or
//! [`PipelineJobRunner`] (templated multi-step commands); tests use scripted
//! runners that never spawn processes.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::WatchError;
use crate::io::config::WatchConfig;
use crate::io::process::run_streaming;
use crate::io::template::CommandTemplates;

/// Submit one staged file for processing.
pub trait JobRunner {
    /// Process `input`, writing results into `output_dir`. Blocks until the
    /// job finishes. Failures are reported as [`WatchError::JobFailed`].
    fn submit(&self, input: &Path, output_dir: &Path) -> Result<(), WatchError>;
}

impl<J: JobRunner + ?Sized> JobRunner for Box<J> {
    fn submit(&self, input: &Path, output_dir: &Path) -> Result<(), WatchError> {
        (**self).submit(input, output_dir)
    }
}

/// Runs `<argv...> <input> <output_dir>` as a child process.
#[derive(Debug, Clone)]
pub struct CommandJobRunner {
    argv: Vec<String>,
    timeout: Option<Duration>,
    tail_lines: usize,
}

impl CommandJobRunner {
    pub fn new(argv: Vec<String>, timeout: Option<Duration>, tail_lines: usize) -> Self {
        Self {
            argv,
            timeout,
            tail_lines,
        }
    }

    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self::new(cfg.submit_command(), cfg.job_timeout(), cfg.stderr_tail_lines)
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl JobRunner for CommandJobRunner {
    #[instrument(skip_all, fields(input = %input.display()))]
    fn submit(&self, input: &Path, output_dir: &Path) -> Result<(), WatchError> {
        let mut argv = self.argv.clone();
        argv.push(input.display().to_string());
        argv.push(output_dir.display().to_string());
        run_argv(&argv, input, self.timeout, self.tail_lines)
    }
}

/// Runs a rendered sequence of commands, stopping at the first failure.
#[derive(Debug)]
pub struct PipelineJobRunner {
    templates: CommandTemplates,
    timeout: Option<Duration>,
    tail_lines: usize,
}

impl PipelineJobRunner {
    pub fn new(templates: CommandTemplates, timeout: Option<Duration>, tail_lines: usize) -> Self {
        Self {
            templates,
            timeout,
            tail_lines,
        }
    }
}

impl JobRunner for PipelineJobRunner {
    #[instrument(skip_all, fields(input = %input.display(), steps = self.templates.len()))]
    fn submit(&self, input: &Path, output_dir: &Path) -> Result<(), WatchError> {
        let commands = self
            .templates
            .render(input, output_dir)
            .map_err(|err| WatchError::JobFailed {
                file: file_label(input),
                status: None,
                stderr_tail: vec![format!("render pipeline: {err}")],
            })?;
        for (step, argv) in commands.iter().enumerate() {
            debug!(step, command = %argv.join(" "), "running pipeline step");
            run_argv(argv, input, self.timeout, self.tail_lines)?;
        }
        Ok(())
    }
}

/// Build the job runner the config asks for.
pub fn runner_from_config(cfg: &WatchConfig) -> Result<Box<dyn JobRunner>, WatchError> {
    match &cfg.pipeline {
        Some(pipeline) => {
            let templates = CommandTemplates::from_config(pipeline)?;
            info!(steps = templates.len(), "using templated pipeline");
            Ok(Box::new(PipelineJobRunner::new(
                templates,
                cfg.job_timeout(),
                cfg.stderr_tail_lines,
            )))
        }
        None => {
            let runner = CommandJobRunner::from_config(cfg);
            info!(command = %runner.argv().join(" "), "using submit command");
            Ok(Box::new(runner))
        }
    }
}

fn run_argv(
    argv: &[String],
    input: &Path,
    timeout: Option<Duration>,
    tail_lines: usize,
) -> Result<(), WatchError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(WatchError::JobFailed {
            file: file_label(input),
            status: None,
            stderr_tail: vec!["empty command".to_string()],
        });
    };
    info!(command = %argv.join(" "), "submitting job");
    let mut cmd = Command::new(program);
    cmd.args(args);

    let output = run_streaming(cmd, timeout, tail_lines).map_err(|err| WatchError::JobFailed {
        file: file_label(input),
        status: None,
        stderr_tail: vec![format!("{err:#}")],
    })?;

    if output.timed_out {
        let mut stderr_tail = output.stderr_tail;
        stderr_tail.push(format!("timed out after {:?}", timeout.unwrap_or_default()));
        return Err(WatchError::JobFailed {
            file: file_label(input),
            status: None,
            stderr_tail,
        });
    }
    if !output.status.success() {
        warn!(exit_code = ?output.status.code(), "job failed");
        return Err(WatchError::JobFailed {
            file: file_label(input),
            status: output.status.code(),
            stderr_tail: output.stderr_tail,
        });
    }
    debug!("job completed successfully");
    Ok(())
}

fn file_label(input: &Path) -> String {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn command_runner_appends_input_and_output_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("img001.tif");
        let out = temp.path().join("out");
        fs::write(&input, "pixels").expect("write input");
        fs::create_dir(&out).expect("mkdir out");

        let runner = CommandJobRunner::new(vec!["cp".to_string()], None, 5);
        runner.submit(&input, &out).expect("submit");

        assert_eq!(
            fs::read_to_string(out.join("img001.tif")).expect("read output"),
            "pixels"
        );
    }

    #[test]
    fn non_zero_exit_reports_status_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandJobRunner::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo bad input $0 >&2; exit 4".to_string(),
            ],
            None,
            5,
        );

        let err = runner
            .submit(&temp.path().join("img.tif"), temp.path())
            .unwrap_err();
        match err {
            WatchError::JobFailed {
                file,
                status,
                stderr_tail,
            } => {
                assert_eq!(file, "img.tif");
                assert_eq!(status, Some(4));
                assert_eq!(stderr_tail.len(), 1);
                assert!(stderr_tail[0].starts_with("bad input"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_executable_is_job_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandJobRunner::new(vec!["/nonexistent/decon".to_string()], None, 5);
        let err = runner
            .submit(&temp.path().join("img.tif"), temp.path())
            .unwrap_err();
        assert!(matches!(err, WatchError::JobFailed { status: None, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn pipeline_stops_at_first_failing_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = temp.path().join("marker");
        let templates = CommandTemplates::compile(vec![
            "false".to_string(),
            format!("touch {}", marker.display()),
        ])
        .expect("compile");
        let runner = PipelineJobRunner::new(templates, None, 5);

        let err = runner
            .submit(&temp.path().join("img.tif"), temp.path())
            .unwrap_err();
        assert!(matches!(err, WatchError::JobFailed { status: Some(1), .. }));
        assert!(!marker.exists());
    }

    #[test]
    fn pipeline_runs_rendered_steps_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("img.tif");
        fs::write(&input, "raw").expect("write input");
        let out = temp.path().join("out");
        fs::create_dir(&out).expect("mkdir");
        let templates = CommandTemplates::compile(vec![
            "cp {{ input_file }} {{ output_dir }}/{{ input_stem }}_deskew.tif".to_string(),
            "cp {{ output_dir }}/{{ input_stem }}_deskew.tif {{ output_dir }}/{{ input_stem }}_decon.tif"
                .to_string(),
        ])
        .expect("compile");

        PipelineJobRunner::new(templates, None, 5)
            .submit(&input, &out)
            .expect("submit");
        assert!(out.join("img_decon.tif").is_file());
    }
}
