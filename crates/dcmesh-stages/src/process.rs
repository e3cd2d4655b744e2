//! ProcessStage Runner: runs one external command, streams its output as
//! log lines, and stops it when the run is cancelled.
//!
//! ```text
//!  child stdout ─► reader thread ─┐
//!                                 ├─► line channel ─┐
//!  child stderr ─► reader thread ─┘                 ├─ select! ─► on_line / terminate
//!                  cancellation token signal ───────┘
//! ```
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Sender};
use dcmesh_core::{CancellationToken, ExecutionContext, PipelineError, Result};
use tracing::{debug, info, warn};

/// How a command run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited,
    Cancelled,
}

/// Program, arguments and extra environment for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCommand {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    /// Command line as shown in logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    terminate_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessRunner {
    pub fn new(terminate_grace: Duration) -> Self {
        Self { terminate_grace }
    }

    /// Runs `command`, forwarding every output line as a log event.
    pub fn run(&self, command: &ProcessCommand, ctx: &ExecutionContext) -> Result<ProcessOutcome> {
        self.run_with(command, ctx.cancel_token(), |line| ctx.log(line))
    }

    /// Runs `command`, handing every stdout/stderr line to `on_line` as it
    /// arrives. Lines of one stream keep their order.
    ///
    /// A non-zero exit is an error unless the run was cancelled.
    pub fn run_with(
        &self,
        command: &ProcessCommand,
        cancel: &CancellationToken,
        mut on_line: impl FnMut(String),
    ) -> Result<ProcessOutcome> {
        let shown = command.display();
        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Cancelled);
        }

        info!(command = %shown, "spawning");
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // own process group, so signals also reach the tool's workers
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut process, 0);

        let mut child = process
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                command: shown.clone(),
                source,
            })?;

        let (tx, lines) = crossbeam_channel::unbounded::<String>();
        if let Some(out) = child.stdout.take() {
            forward_lines(out, tx.clone(), "stdout");
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, tx.clone(), "stderr");
        }
        drop(tx);

        loop {
            select! {
                recv(lines) -> line => match line {
                    Ok(line) => on_line(line),
                    // both streams closed
                    Err(_) => break,
                },
                recv(cancel.signal()) -> _ => {
                    on_line(format!("cancelling: {shown}"));
                    self.terminate(&mut child);
                    return Ok(ProcessOutcome::Cancelled);
                }
            }
        }

        let status = child.wait()?;
        debug!(command = %shown, status = %status, "process exited");
        if status.success() {
            Ok(ProcessOutcome::Exited)
        } else if cancel.is_cancelled() {
            Ok(ProcessOutcome::Cancelled)
        } else {
            Err(PipelineError::ProcessFailure {
                command: shown,
                code: status.code(),
            })
        }
    }

    /// Terminate request to the child's process group first; forced kill
    /// of the group once the grace period is over.
    fn terminate(&self, child: &mut Child) {
        request_terminate(child);

        let deadline = Instant::now() + self.terminate_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = child.id(), status = %status, "terminated");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) => break,
                Err(err) => {
                    warn!(pid = child.id(), error = %err, "cannot poll child");
                    break;
                }
            }
        }

        warn!(pid = child.id(), "child ignored terminate request, killing");
        force_kill(child);
        let _ = child.wait();
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    // the child leads its own group, so its pid is the group id
    if let Err(err) = killpg(Pid::from_raw(child.id() as i32), signal) {
        warn!(pgid = child.id(), signal = ?signal, error = %err, "cannot signal process group");
    }
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) {
    force_kill(child);
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(pid = child.id(), error = %err, "kill failed");
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, tx: Sender<String>, name: &'static str) {
    let spawned = thread::Builder::new()
        .name(format!("dcmesh-{name}"))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(stream = name, error = %err, "output stream closed");
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        warn!(stream = name, error = %err, "cannot start output reader");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh").arg("-c").arg(script)
    }

    fn collect(runner: &ProcessRunner, cmd: &ProcessCommand) -> (Result<ProcessOutcome>, Vec<String>) {
        let token = CancellationToken::new();
        let mut lines = Vec::new();
        let result = runner.run_with(cmd, &token, |l| lines.push(l));
        (result, lines)
    }

    #[test]
    fn test_streams_stdout_in_order() {
        let (result, lines) = collect(
            &ProcessRunner::default(),
            &sh("echo one; echo two; printf 'three\\r\\n'"),
        );
        assert_eq!(result.unwrap(), ProcessOutcome::Exited);
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_stderr_is_forwarded() {
        let (result, lines) = collect(&ProcessRunner::default(), &sh("echo oops >&2"));
        assert_eq!(result.unwrap(), ProcessOutcome::Exited);
        assert_eq!(lines, vec!["oops"]);
    }

    #[test]
    fn test_nonzero_exit_is_process_failure() {
        let (result, _) = collect(&ProcessRunner::default(), &sh("echo working; exit 3"));
        match result {
            Err(PipelineError::ProcessFailure { command, code }) => {
                assert_eq!(code, Some(3));
                assert!(command.starts_with("sh -c"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let cmd = ProcessCommand::new("/nonexistent/dcmesh-tool").arg("-o");
        let (result, _) = collect(&ProcessRunner::default(), &cmd);
        assert!(matches!(result, Err(PipelineError::Spawn { .. })));
    }

    #[test]
    fn test_env_is_passed_to_child_only() {
        let cmd = sh("echo \"$DCMESH_TEST_VALUE\"").env("DCMESH_TEST_VALUE", "from-config");
        let (_, lines) = collect(&ProcessRunner::default(), &cmd);
        assert_eq!(lines, vec!["from-config"]);
        assert!(std::env::var_os("DCMESH_TEST_VALUE").is_none());
    }

    #[test]
    fn test_cancel_while_child_is_silent() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        let canceller = token.clone();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&lines);

        let started = Instant::now();
        let result = runner.run_with(&sh("echo ready; exec sleep 30"), &token, move |line| {
            if line == "ready" {
                canceller.cancel();
            }
            seen.lock().unwrap().push(line);
        });

        assert_eq!(result.unwrap(), ProcessOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], "ready");
        assert!(lines.last().unwrap().starts_with("cancelling"));
    }

    #[test]
    fn test_stubborn_child_is_killed_after_grace() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let token = CancellationToken::new();
        let canceller = token.clone();

        let started = Instant::now();
        let result = runner.run_with(
            &sh("trap '' TERM; echo ready; while true; do sleep 0.1; done"),
            &token,
            move |line| {
                if line == "ready" {
                    canceller.cancel();
                }
            },
        );
        assert_eq!(result.unwrap(), ProcessOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_stops_background_workers_of_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let beat = dir.path().join("beat");
        let script = format!(
            "(while true; do echo x >> '{}'; sleep 0.05; done) & echo ready; wait",
            beat.display()
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        let result = ProcessRunner::new(Duration::from_secs(5)).run_with(
            &sh(&script),
            &token,
            move |line| {
                if line == "ready" {
                    canceller.cancel();
                }
            },
        );
        assert_eq!(result.unwrap(), ProcessOutcome::Cancelled);

        let size = || std::fs::metadata(&beat).map(|m| m.len()).unwrap_or(0);
        thread::sleep(Duration::from_millis(300));
        let settled = size();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(size(), settled, "worker still running after cancel");
    }

    #[test]
    fn test_already_cancelled_never_spawns() {
        let token = CancellationToken::new();
        token.cancel();
        let cmd = ProcessCommand::new("/nonexistent/dcmesh-tool");
        let outcome = ProcessRunner::default()
            .run_with(&cmd, &token, |_| {})
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Cancelled);
    }

    #[test]
    fn test_display_joins_arguments() {
        let cmd = ProcessCommand::new("dcm2niix")
            .arg("-o")
            .path_arg(Path::new("/tmp/vol"))
            .arg("-z")
            .arg("y");
        assert_eq!(cmd.display(), "dcm2niix -o /tmp/vol -z y");
    }
}
