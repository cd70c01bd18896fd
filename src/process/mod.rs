// src/process/mod.rs

//! Shell-wrapped child processes with optional output capture
//!
//! Every command runs as `<shell> -c "<joined args>"` so that a `PATH`
//! extended through the environment overlay is honored when the shell looks
//! up the target binary. Captured streams are drained by background threads
//! while the caller blocks in [`ProcessHandle::wait`], which keeps a chatty
//! build from filling a pipe and stalling.

mod cancel;

pub use cancel::CancellationState;

use crate::error::{Outcome, Result};
use cancel::ChildSlot;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// Upper bound on how long a cancellation waits for the reaping thread
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read size for output drains
const DRAIN_CHUNK_SIZE: usize = 4096;

/// A command line plus the environment it runs in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    /// Working directory, inherited when `None`
    pub working_dir: Option<PathBuf>,
    /// Words joined with spaces and handed to `<shell> -c`
    pub args: Vec<String>,
    /// Variables overlaid onto the inherited environment
    pub env: BTreeMap<String, String>,
}

impl ShellCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            working_dir: None,
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// The script passed to the shell
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// Which streams to capture instead of inheriting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputCapture {
    pub stdout: bool,
    pub stderr: bool,
}

impl OutputCapture {
    pub const fn all() -> Self {
        Self { stdout: true, stderr: true }
    }

    pub const fn none() -> Self {
        Self { stdout: false, stderr: false }
    }
}

/// Output collected from a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// `None` when stdout was not captured
    pub stdout: Option<String>,
    /// `None` when stderr was not captured
    pub stderr: Option<String>,
}

/// Spawns commands through a shell and registers them for cancellation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: String,
    cancellation: Arc<CancellationState>,
}

impl ProcessRunner {
    pub fn new(shell: impl Into<String>, cancellation: Arc<CancellationState>) -> Self {
        Self {
            shell: shell.into(),
            cancellation,
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn cancellation(&self) -> &Arc<CancellationState> {
        &self.cancellation
    }

    /// Start `command`
    ///
    /// Returns `Outcome::Cancelled` without spawning anything once
    /// cancellation was requested.
    pub fn run(&self, command: &ShellCommand, capture: OutputCapture) -> Result<Outcome<ProcessHandle>> {
        let command_line = command.command_line();
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command_line)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(if capture.stdout { Stdio::piped() } else { Stdio::inherit() })
            .stderr(if capture.stderr { Stdio::piped() } else { Stdio::inherit() })
            .process_group(0);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            "Running `{}` in {}",
            command_line,
            command
                .working_dir
                .as_deref()
                .map_or_else(|| ".".to_string(), |d| d.display().to_string())
        );

        let slot = match self.cancellation.spawn(|| cmd.spawn())? {
            Outcome::Completed(slot) => slot,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };

        let (stdout, stderr) = {
            let mut state = slot.lock();
            (state.child.stdout.take(), state.child.stderr.take())
        };

        let mut handle = ProcessHandle {
            slot,
            cancellation: Arc::clone(&self.cancellation),
            command_line,
            stdout: None,
            stderr: None,
        };
        if let Some(pipe) = stdout {
            handle.stdout = Some(spawn_drain("stdout", pipe)?);
        }
        if let Some(pipe) = stderr {
            handle.stderr = Some(spawn_drain("stderr", pipe)?);
        }

        Ok(Outcome::Completed(handle))
    }

    /// Run `command` to completion, returning its status and output
    pub fn run_to_completion(
        &self,
        command: &ShellCommand,
        capture: OutputCapture,
    ) -> Result<Outcome<(ExitStatus, CapturedOutput)>> {
        let mut handle = match self.run(command, capture)? {
            Outcome::Completed(handle) => handle,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };
        let status = handle.wait()?;
        let output = handle.take_output();
        Ok(Outcome::Completed((status, output)))
    }
}

/// A running child plus its output drains
///
/// Dropping a handle whose process is still running kills it.
pub struct ProcessHandle {
    slot: Arc<ChildSlot>,
    cancellation: Arc<CancellationState>,
    command_line: String,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl ProcessHandle {
    pub fn id(&self) -> u32 {
        self.slot.pid()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Block until the process exits
    ///
    /// The child lock is released between bounded waits so that
    /// [`CancellationState::cancel`] can kill the process promptly.
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            let mut state = self.slot.lock();
            if let Some(status) = state.status {
                return Ok(status);
            }
            if let Some(status) = state.child.wait_timeout(WAIT_POLL_INTERVAL)? {
                trace!("`{}` exited with {}", self.command_line, status);
                state.status = Some(status);
                return Ok(status);
            }
            parking_lot::MutexGuard::unlock_fair(state);
        }
    }

    /// Exit code once the process has been reaped, `None` while running or
    /// when it was killed by a signal
    pub fn exit_code(&self) -> Option<i32> {
        self.slot.lock().status.and_then(|status| status.code())
    }

    /// Kill the process and its process group
    pub fn terminate(&self) {
        self.slot.terminate();
    }

    /// Join the drains and return whatever they collected
    ///
    /// Blocks until both captured streams reach end-of-file. Call after
    /// [`wait`](Self::wait); a second call returns `None` for both streams.
    pub fn take_output(&mut self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout.take().map(join_drain),
            stderr: self.stderr.take().map(join_drain),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let running = self.slot.lock().status.is_none();
        if running {
            self.slot.terminate();
            let mut state = self.slot.lock();
            if let Ok(status) = state.child.wait() {
                state.status = Some(status);
            }
        }
        self.cancellation.clear(&self.slot);
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.id())
            .field("command_line", &self.command_line)
            .finish_non_exhaustive()
    }
}

fn join_drain(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_else(|_| {
        warn!("Output drain thread panicked");
        String::new()
    })
}

/// Read `pipe` to end-of-file on a background thread
///
/// Reads whatever is available instead of waiting for full lines, so the
/// thread ends as soon as the last writer closes the pipe.
fn spawn_drain<R>(stream: &'static str, mut pipe: R) -> io::Result<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("drain-{}", stream))
        .spawn(move || {
            let mut captured = Vec::new();
            let mut chunk = [0u8; DRAIN_CHUNK_SIZE];
            let mut line_start = 0;

            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        captured.extend_from_slice(&chunk[..n]);
                        while let Some(offset) = captured[line_start..].iter().position(|b| *b == b'\n') {
                            let end = line_start + offset;
                            trace!(stream, "{}", String::from_utf8_lossy(&captured[line_start..end]));
                            line_start = end + 1;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("Stopped draining {}: {}", stream, e);
                        break;
                    }
                }
            }

            String::from_utf8_lossy(&captured).into_owned()
        })
}

/// Quote `path` for interpolation into a shell command line
pub fn shell_quote(path: &Path) -> String {
    let text = path.to_string_lossy();
    if !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c))
    {
        text.into_owned()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn runner() -> ProcessRunner {
        ProcessRunner::new("sh", CancellationState::new())
    }

    #[test]
    fn test_captures_both_streams() {
        let command = ShellCommand::new(["echo", "out;", "echo", "err", "1>&2"]);
        let (status, output) = runner()
            .run_to_completion(&command, OutputCapture::all())
            .unwrap()
            .completed()
            .unwrap();

        assert!(status.success());
        assert_eq!(output.stdout.as_deref(), Some("out\n"));
        assert_eq!(output.stderr.as_deref(), Some("err\n"));
    }

    #[test]
    fn test_uncaptured_streams_are_none() {
        let command = ShellCommand::new(["true"]);
        let (_, output) = runner()
            .run_to_completion(&command, OutputCapture::none())
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(output, CapturedOutput::default());
    }

    #[test]
    fn test_env_overlay_and_working_dir() {
        let temp = TempDir::new().unwrap();
        let command = ShellCommand::new(["echo", "$GREETING", ";", "pwd"])
            .with_env("GREETING", "hello")
            .with_working_dir(temp.path());

        let (status, output) = runner()
            .run_to_completion(&command, OutputCapture::all())
            .unwrap()
            .completed()
            .unwrap();

        assert!(status.success());
        let stdout = output.stdout.unwrap();
        let mut lines = stdout.lines();
        assert_eq!(lines.next(), Some("hello"));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(pwd.canonicalize().unwrap(), temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_exit_code_reported() {
        let runner = runner();
        let mut handle = runner
            .run(&ShellCommand::new(["exit", "3"]), OutputCapture::all())
            .unwrap()
            .completed()
            .unwrap();

        let status = handle.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(handle.exit_code(), Some(3));
        assert_eq!(handle.take_output().stdout.as_deref(), Some(""));
    }

    #[test]
    fn test_large_output_does_not_block() {
        let command = ShellCommand::new(["head", "-c", "1048576", "/dev/zero"]);
        let (status, output) = runner()
            .run_to_completion(&command, OutputCapture::all())
            .unwrap()
            .completed()
            .unwrap();
        assert!(status.success());
        assert_eq!(output.stdout.unwrap().len(), 1_048_576);
    }

    #[test]
    fn test_cancel_kills_running_process() {
        let runner = runner();
        let cancellation = Arc::clone(runner.cancellation());
        let mut handle = runner
            .run(&ShellCommand::new(["sleep", "30"]), OutputCapture::all())
            .unwrap()
            .completed()
            .unwrap();
        assert!(cancellation.has_active());

        let started = Instant::now();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancellation.cancel();
        });

        let status = handle.wait().unwrap();
        let output = handle.take_output();
        canceller.join().unwrap();

        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.stdout.as_deref(), Some(""));
        assert!(runner.run(&ShellCommand::new(["true"]), OutputCapture::none()).unwrap().is_cancelled());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(Path::new("/opt/prefix")), "/opt/prefix");
        assert_eq!(shell_quote(Path::new("/tmp/with space")), "'/tmp/with space'");
        assert_eq!(shell_quote(Path::new("it's")), r"'it'\''s'");
    }
}
