//! Command templates for multi-step processing pipelines.
//!
//! Each template renders to one command line for a submitted file. The
//! templates are compiled and trial-rendered once at startup, so the loop only
//! ever sees a fixed, valid command list.

use std::fs;
use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::debug;

use crate::error::WatchError;
use crate::io::config::PipelineConfig;

/// Named substitutions available to every template.
#[derive(Debug, Clone, Serialize)]
struct StepContext {
    input_file: String,
    input_name: String,
    input_stem: String,
    input_dir: String,
    output_dir: String,
}

impl StepContext {
    fn new(input: &Path, output_dir: &Path) -> Self {
        let lossy = |p: Option<&std::ffi::OsStr>| {
            p.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        };
        Self {
            input_file: input.display().to_string(),
            input_name: lossy(input.file_name()),
            input_stem: lossy(input.file_stem()),
            input_dir: input
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            output_dir: output_dir.display().to_string(),
        }
    }
}

/// Ordered, compiled command templates.
pub struct CommandTemplates {
    env: Environment<'static>,
    names: Vec<String>,
}

impl std::fmt::Debug for CommandTemplates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTemplates")
            .field("steps", &self.names.len())
            .finish()
    }
}

impl CommandTemplates {
    /// Collect templates from inline `steps` followed by `template_file` lines.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, WatchError> {
        let mut sources = cfg.steps.clone();
        if let Some(path) = &cfg.template_file {
            let text = fs::read_to_string(path).map_err(|err| {
                WatchError::Config(format!("read template file {}: {err}", path.display()))
            })?;
            sources.extend(template_lines(&text));
        }
        Self::compile(sources)
    }

    pub fn compile(sources: Vec<String>) -> Result<Self, WatchError> {
        if sources.is_empty() {
            return Err(WatchError::Config("pipeline has no command steps".to_string()));
        }
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        let mut names = Vec::with_capacity(sources.len());
        for (idx, source) in sources.into_iter().enumerate() {
            let name = format!("step-{idx}");
            env.add_template_owned(name.clone(), source)
                .map_err(|err| WatchError::Config(format!("compile pipeline {name}: {err}")))?;
            names.push(name);
        }
        let templates = Self { env, names };

        // Trial render so unknown variables fail at startup, not mid-run.
        let sample = StepContext::new(Path::new("/in/sample.tif"), Path::new("/out"));
        for name in &templates.names {
            templates
                .render_step(name, &sample)
                .map_err(|err| WatchError::Config(format!("render pipeline {name}: {err}")))?;
        }
        debug!(steps = templates.names.len(), "compiled pipeline templates");
        Ok(templates)
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    /// Render every step for `input`, split into argv vectors. Steps that
    /// render to blank lines are dropped.
    ///
    /// Splitting happens after rendering and knows no quoting, so a path that
    /// contains whitespace becomes several arguments. Keep watched paths and
    /// acquisition file names free of spaces when using a pipeline.
    pub fn render(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<Vec<String>>, minijinja::Error> {
        let ctx = StepContext::new(input, output_dir);
        let mut commands = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let argv = self.render_step(name, &ctx)?;
            if !argv.is_empty() {
                commands.push(argv);
            }
        }
        Ok(commands)
    }

    fn render_step(&self, name: &str, ctx: &StepContext) -> Result<Vec<String>, minijinja::Error> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        Ok(rendered.split_whitespace().map(str::to_string).collect())
    }
}

/// Non-empty, non-comment lines of a template file.
fn template_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}
