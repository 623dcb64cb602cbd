//! Test-only helpers: a temp workspace with the four watched directories and a
//! scripted job runner that never spawns processes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::WatchError;
use crate::io::config::WatchConfig;
use crate::io::job::JobRunner;

/// Temp directory holding remote/massive input/output dirs and a ledger path.
pub struct TestDirs {
    temp: TempDir,
    pub remote_input: PathBuf,
    pub remote_output: PathBuf,
    pub massive_input: PathBuf,
    pub massive_output: PathBuf,
    pub ledger: PathBuf,
}

impl TestDirs {
    pub fn new() -> io::Result<Self> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        let dirs = Self {
            remote_input: root.join("remote_input"),
            remote_output: root.join("remote_output"),
            massive_input: root.join("massive_input"),
            massive_output: root.join("massive_output"),
            ledger: root.join("submitted.json"),
            temp,
        };
        for dir in [
            &dirs.remote_input,
            &dirs.remote_output,
            &dirs.massive_input,
            &dirs.massive_output,
        ] {
            fs::create_dir(dir)?;
        }
        Ok(dirs)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Config over these directories with `command` as executable + arguments,
    /// `delay = 1` and no sleep between cycles.
    pub fn config(&self, command: &[&str]) -> WatchConfig {
        let mut cfg = WatchConfig::new(
            &self.remote_input,
            &self.remote_output,
            &self.massive_input,
            &self.massive_output,
            &self.ledger,
        );
        if let Some((exe, args)) = command.split_first() {
            cfg.executable = Some(exe.to_string());
            cfg.arguments = args.iter().map(|a| a.to_string()).collect();
        }
        cfg.delay = 1;
        cfg.timeout = 0;
        cfg
    }

    /// Serialize `cfg` to `watch.toml` under the temp root.
    pub fn write_config(&self, cfg: &WatchConfig) -> io::Result<PathBuf> {
        let text = toml::to_string_pretty(cfg).map_err(io::Error::other)?;
        let path = self.root().join("watch.toml");
        fs::write(&path, text)?;
        Ok(path)
    }

    /// Drop a file into the remote input directory, as the microscope would.
    pub fn add_input(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.remote_input.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn read_ledger(&self) -> io::Result<Vec<String>> {
        let contents = fs::read_to_string(&self.ledger)?;
        serde_json::from_str(&contents).map_err(io::Error::other)
    }

    /// Sorted file names in `dir`.
    pub fn names_in(dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptedMode {
    /// Copy the input into the output dir under the same name.
    Copy,
    /// Succeed without producing output.
    Silent,
}

/// Job runner that records calls and simulates the collaborator in-process.
#[derive(Debug)]
pub struct ScriptedJobRunner {
    mode: ScriptedMode,
    calls: RefCell<Vec<String>>,
    failures: RefCell<HashMap<String, u32>>,
}

impl ScriptedJobRunner {
    pub fn copying() -> Self {
        Self::with_mode(ScriptedMode::Copy)
    }

    pub fn silent() -> Self {
        Self::with_mode(ScriptedMode::Silent)
    }

    fn with_mode(mode: ScriptedMode) -> Self {
        Self {
            mode,
            calls: RefCell::new(Vec::new()),
            failures: RefCell::new(HashMap::new()),
        }
    }

    /// Fail the next submission of `name` with exit status 1.
    pub fn failing_once(self, name: &str) -> Self {
        self.failing(name, 1)
    }

    /// Fail the next `times` submissions of `name`.
    pub fn failing(self, name: &str, times: u32) -> Self {
        self.failures.borrow_mut().insert(name.to_string(), times);
        self
    }

    /// File names submitted so far, in call order (failed calls included).
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl JobRunner for ScriptedJobRunner {
    fn submit(&self, input: &Path, output_dir: &Path) -> Result<(), WatchError> {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.borrow_mut().push(name.clone());

        if let Some(remaining) = self.failures.borrow_mut().get_mut(&name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(WatchError::JobFailed {
                file: name,
                status: Some(1),
                stderr_tail: vec!["scripted failure".to_string()],
            });
        }

        if self.mode == ScriptedMode::Copy {
            fs::copy(input, output_dir.join(&name)).map_err(|source| WatchError::Copy {
                from: input.to_path_buf(),
                to: output_dir.join(&name),
                source,
            })?;
        }
        Ok(())
    }
}
