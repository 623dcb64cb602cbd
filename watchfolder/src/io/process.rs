//! Child process helper that streams output lines into the log as they arrive.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// Outcome of a streamed child process.
#[derive(Debug)]
pub struct StreamedOutput {
    pub status: ExitStatus,
    /// Last stderr lines, oldest first.
    pub stderr_tail: Vec<String>,
    pub timed_out: bool,
}

impl StreamedOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run `cmd`, logging stdout lines at info and stderr lines at warn while the
/// child runs.
///
/// Pipes are drained on reader threads so a chatty child cannot deadlock.
/// Only the last `tail_lines` stderr lines are kept in memory. With a
/// `timeout`, the child's whole process group is killed once it elapses, so
/// launchers like `sh -c` or `srun` cannot leave grandchildren holding the
/// pipes open.
#[instrument(skip_all, fields(program = %cmd.get_program().to_string_lossy(), timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_streaming(
    mut cmd: Command,
    timeout: Option<Duration>,
    tail_lines: usize,
) -> Result<StreamedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || {
        for_each_line(stdout, |line| info!(target: "watchfolder::job", "stdout: {line}"))
    });
    let stderr_handle = thread::spawn(move || -> Result<Vec<String>> {
        let mut tail = VecDeque::with_capacity(tail_lines);
        for_each_line(stderr, |line| {
            warn!(target: "watchfolder::job", "stderr: {line}");
            if tail_lines > 0 {
                if tail.len() == tail_lines {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
        })?;
        Ok(Vec::from(tail))
    });

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                kill_process_group(&mut child).context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
        None => child.wait().context("wait for command")?,
    };

    join_reader(stdout_handle).context("join stdout")?;
    let stderr_tail = join_reader(stderr_handle).context("join stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(StreamedOutput {
        status,
        stderr_tail,
        timed_out,
    })
}

/// Kill the child and everything it spawned. The child leads its own process
/// group, so its pid is the group id.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match i32::try_from(child.id()) {
        Ok(pid) => match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(errno) => {
                warn!(%errno, "failed to kill process group, killing child only");
                child.kill()
            }
        },
        Err(_) => child.kill(),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn for_each_line<R: Read, F: FnMut(&str)>(reader: R, mut on_line: F) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line);
        on_line(text.trim_end_matches(['\r', '\n']));
    }
}

fn join_reader<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}
