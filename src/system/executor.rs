// src/system/executor.rs

//! Spawning processes under an execution mode, with exit-code checks, timeouts and cancellation.

use crate::CancellationToken;
use crate::core::steps::{Mode, Outcome};
use crate::models::{RetCode, RunOptions, RunResult};
use crate::system::process::Process;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command as StdCommand, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a running child is polled for exit, timeout and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Failure to run a process step.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A command line could not be split into words.
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    /// The process names no program.
    #[error("No command specified to run.")]
    EmptyCommand,
    /// The program does not exist.
    #[error("Command '{0}' was not found.")]
    CommandNotFound(String),
    /// Spawning or talking to the process failed.
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, #[source] io::Error),
    /// The exit code was not accepted.
    #[error("Command '{command}' exited with {} (expected {expected}).", describe_code(.code))]
    ProcessFailed {
        /// Formulation of the process.
        command: String,
        /// Exit code; `None` when killed by a signal.
        code: Option<i32>,
        /// The codes that would have been accepted.
        expected: RetCode,
        /// Captured standard output, empty when not captured.
        stdout: String,
        /// Captured standard error, empty when not captured.
        stderr: String,
    },
    /// The process outlived its timeout and was killed.
    #[error("Command '{command}' timed out after {timeout:?}.")]
    Timeout {
        /// Formulation of the process.
        command: String,
        /// The limit that elapsed.
        timeout: Duration,
    },
    /// Captured output was not text.
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        /// Formulation of the process.
        command: String,
        /// The decoding failure.
        #[source]
        source: std::string::FromUtf8Error,
    },
    /// The user interrupted the run.
    #[error("Operation was cancelled by the user.")]
    Interrupted,
}

impl ExecutionError {
    /// Short name used when reporting the error to the user.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CommandParse(_) => "CommandParse",
            Self::EmptyCommand => "EmptyCommand",
            Self::CommandNotFound(_) => "CommandNotFound",
            Self::CommandFailed(..) => "CommandFailed",
            Self::ProcessFailed { .. } => "ProcessFailed",
            Self::Timeout { .. } => "Timeout",
            Self::InvalidUtf8Output { .. } => "InvalidUtf8Output",
            Self::Interrupted => "Interrupted",
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no code (killed by a signal)".to_string(),
    }
}

/// Runs one process under one execution mode.
pub trait ProcessRunner {
    /// # Errors
    ///
    /// Any [`ExecutionError`]; `ProcessFailed` when the exit code is not
    /// accepted by the effective `retcode`.
    fn run(
        &self,
        process: &Process,
        mode: Mode,
        options: &RunOptions,
    ) -> Result<Outcome, ExecutionError>;

    /// Whether the user asked to stop.
    fn interrupted(&self) -> bool {
        false
    }
}

/// Runs processes on this machine. Waits are polled so that a raised
/// cancellation token or an elapsed timeout kills the child.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    token: CancellationToken,
}

impl LocalRunner {
    /// A runner that stops when `token` is raised.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// The cancellation token this runner polls.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn spawn(
        &self,
        process: &Process,
        command_line: &str,
        piped: bool,
    ) -> Result<Child, ExecutionError> {
        let mut command = StdCommand::new(process.program());
        command.args(process.get_args()).envs(process.get_env());
        if let Some(dir) = process.get_current_dir() {
            command.current_dir(dunce::simplified(dir));
        }

        let output = || {
            if piped {
                Stdio::piped()
            } else {
                Stdio::inherit()
            }
        };
        command.stdout(output()).stderr(output());
        command.stdin(match process.get_stdin() {
            Some(_) => Stdio::piped(),
            None if piped => Stdio::null(),
            None => Stdio::inherit(),
        });

        let child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ExecutionError::CommandNotFound(process.program().to_string()),
            _ => ExecutionError::CommandFailed(command_line.to_string(), e),
        })?;
        log::debug!("Spawned '{}' (PID: {})", command_line, child.id());
        Ok(child)
    }
}

impl ProcessRunner for LocalRunner {
    fn run(
        &self,
        process: &Process,
        mode: Mode,
        options: &RunOptions,
    ) -> Result<Outcome, ExecutionError> {
        if self.interrupted() {
            return Err(ExecutionError::Interrupted);
        }
        if process.program().trim().is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }
        let command_line = process.to_string();

        let input = process.get_stdin();
        match mode {
            Mode::Foreground => {
                let mut child = self.spawn(process, &command_line, false)?;
                let streams = Streams::attach(&mut child, input, false);
                let mut child = scopeguard::guard(child, |mut child| kill(&mut child));
                let status = wait_for(&mut child, &command_line, options.timeout, &self.token)?;
                streams.finish(&command_line)?;
                let result = RunResult {
                    code: status.code(),
                    stdout: None,
                    stderr: None,
                };
                check_retcode(&command_line, options, result).map(Outcome::Finished)
            }
            Mode::Tee | Mode::Suppressed => {
                let mut child = self.spawn(process, &command_line, true)?;
                let streams = Streams::attach(&mut child, input, mode == Mode::Tee);
                collect(child, streams, &command_line, options, &self.token)
                    .map(Outcome::Finished)
            }
            Mode::Background => {
                let mut child = self.spawn(process, &command_line, true)?;
                let streams = Streams::attach(&mut child, input, false);
                Ok(Outcome::Background(BackgroundHandle {
                    child,
                    streams,
                    command: command_line,
                    options: options.clone(),
                    token: self.token.clone(),
                }))
            }
        }
    }

    fn interrupted(&self) -> bool {
        self.token.load(Ordering::SeqCst)
    }
}

/// A process started with the background strategy.
#[derive(Debug)]
pub struct BackgroundHandle {
    child: Child,
    streams: Streams,
    command: String,
    options: RunOptions,
    token: CancellationToken,
}

impl BackgroundHandle {
    /// OS process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The formulation the process was started from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit code once finished, without blocking. `Ok(None)` while running.
    ///
    /// A finished process killed by a signal reports `Some(None)`.
    pub fn poll(&mut self) -> Result<Option<Option<i32>>, ExecutionError> {
        self.child
            .try_wait()
            .map(|status| status.map(|status| status.code()))
            .map_err(|e| ExecutionError::CommandFailed(self.command.clone(), e))
    }

    /// Whether the process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    /// Blocks until exit, honoring the step's `timeout` (counted from this
    /// call) and `retcode`, and returns the captured triple.
    ///
    /// # Errors
    ///
    /// As for a suppressed step.
    pub fn wait(self) -> Result<RunResult, ExecutionError> {
        collect(
            self.child,
            self.streams,
            &self.command,
            &self.options,
            &self.token,
        )
    }

    /// Kills the process if it is still running.
    pub fn kill(mut self) {
        kill(&mut self.child);
    }
}

fn kill(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    log::debug!("Killing child process (PID: {})...", child.id());
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill child process {}: {}", child.id(), e);
    }
    // Reap it so no zombie is left behind.
    child.wait().ok();
}

/// Polls `child` until it exits. Kills it on cancellation, on timeout and on
/// polling errors, so that nothing outlives a failed wait.
fn wait_for(
    child: &mut Child,
    command: &str,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<ExitStatus, ExecutionError> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // A terminal interrupt reaches the child too; report the interrupt.
                if token.load(Ordering::SeqCst) {
                    return Err(ExecutionError::Interrupted);
                }
                return Ok(status);
            }
            Ok(None) => {
                if token.load(Ordering::SeqCst) {
                    kill(child);
                    return Err(ExecutionError::Interrupted);
                }
                if let Some(limit) = timeout {
                    if started.elapsed() >= limit {
                        kill(child);
                        return Err(ExecutionError::Timeout {
                            command: command.to_string(),
                            timeout: limit,
                        });
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill(child);
                return Err(ExecutionError::CommandFailed(command.to_string(), e));
            }
        }
    }
}

/// Reads `source` to its end, echoing each line to `echo` when given.
fn drain<R: Read, W: Write>(source: Option<R>, mut echo: Option<W>) -> io::Result<Vec<u8>> {
    let Some(source) = source else {
        return Ok(Vec::new());
    };
    let mut reader = BufReader::new(source);
    let mut captured = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if let Some(out) = echo.as_mut() {
            out.write_all(&line)?;
            out.flush()?;
        }
        captured.extend_from_slice(&line);
    }
    Ok(captured)
}

/// Threads feeding a child's stdin and draining its stdout and stderr.
///
/// They run beside the wait loop, so a child that fills one pipe while the
/// other is still being written cannot block a timeout or an interrupt.
#[derive(Debug)]
struct Streams {
    feeder: Option<JoinHandle<io::Result<()>>>,
    stdout: JoinHandle<io::Result<Vec<u8>>>,
    stderr: JoinHandle<io::Result<Vec<u8>>>,
}

impl Streams {
    fn attach(child: &mut Child, input: Option<&str>, echo: bool) -> Self {
        let feeder = match (input, child.stdin.take()) {
            (Some(input), Some(stdin)) => {
                let input = input.to_string();
                Some(thread::spawn(move || feed(stdin, input)))
            }
            _ => None,
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Self {
            feeder,
            stdout: thread::spawn(move || drain(stdout, echo.then(io::stdout))),
            stderr: thread::spawn(move || drain(stderr, echo.then(io::stderr))),
        }
    }

    /// Joins every thread once the child has exited.
    fn finish(self, command: &str) -> Result<(String, String), ExecutionError> {
        if let Some(feeder) = self.feeder {
            feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("input writer panicked")))
                .map_err(|e| ExecutionError::CommandFailed(command.to_string(), e))?;
        }
        Ok((joined(self.stdout, command)?, joined(self.stderr, command)?))
    }
}

/// Writes `input` and closes the pipe so the child sees EOF. A child that
/// exits without reading everything is not an error.
fn feed(mut stdin: ChildStdin, input: String) -> io::Result<()> {
    match stdin.write_all(input.as_bytes()) {
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn joined(
    reader: JoinHandle<io::Result<Vec<u8>>>,
    command: &str,
) -> Result<String, ExecutionError> {
    let bytes = reader
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output reader panicked")))
        .map_err(|e| ExecutionError::CommandFailed(command.to_string(), e))?;
    String::from_utf8(bytes).map_err(|source| ExecutionError::InvalidUtf8Output {
        command: command.to_string(),
        source,
    })
}

/// Waits for a child whose pipes are served by `streams` and returns the
/// captured triple.
///
/// On a failed wait the child is already dead; the threads are left to end
/// on their own, since a grandchild may still hold a pipe open.
fn collect(
    child: Child,
    streams: Streams,
    command: &str,
    options: &RunOptions,
    token: &CancellationToken,
) -> Result<RunResult, ExecutionError> {
    let mut child = scopeguard::guard(child, |mut child| kill(&mut child));
    let status = wait_for(&mut child, command, options.timeout, token)?;
    let (stdout, stderr) = streams.finish(command)?;

    let result = RunResult {
        code: status.code(),
        stdout: Some(stdout),
        stderr: Some(stderr),
    };
    check_retcode(command, options, result)
}

fn check_retcode(
    command: &str,
    options: &RunOptions,
    result: RunResult,
) -> Result<RunResult, ExecutionError> {
    let expected = options.effective_retcode();
    if expected.accepts(result.code) {
        return Ok(result);
    }
    Err(ExecutionError::ProcessFailed {
        command: command.to_string(),
        code: result.code,
        expected,
        stdout: result.stdout.unwrap_or_default(),
        stderr: result.stderr.unwrap_or_default(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn sh(script: &str) -> Process {
        Process::new("sh").arg("-c").arg(script)
    }

    fn finished(outcome: Outcome) -> RunResult {
        outcome.into_result().unwrap()
    }

    #[test]
    fn test_suppressed_captures_both_streams() {
        let runner = LocalRunner::default();
        let options = RunOptions::new().retcode(3);
        let result = finished(
            runner
                .run(&sh("echo out; echo err >&2; exit 3"), Mode::Suppressed, &options)
                .unwrap(),
        );
        assert_eq!(result.code, Some(3));
        assert_eq!(result.stdout.as_deref(), Some("out\n"));
        assert_eq!(result.stderr.as_deref(), Some("err\n"));
    }

    #[test]
    fn test_tee_captures_while_streaming() {
        let runner = LocalRunner::default();
        let result = finished(
            runner
                .run(&sh("echo teed"), Mode::Tee, &RunOptions::new())
                .unwrap(),
        );
        assert_eq!(result.stdout.as_deref(), Some("teed\n"));
    }

    #[test]
    fn test_foreground_reports_code_only() {
        let runner = LocalRunner::default();
        let result = finished(
            runner
                .run(&Process::new("true"), Mode::Foreground, &RunOptions::new())
                .unwrap(),
        );
        assert_eq!(result.code, Some(0));
        assert!(result.stdout.is_none());
    }

    #[test]
    fn test_unexpected_exit_code_fails() {
        let runner = LocalRunner::default();
        let err = runner
            .run(&sh("echo partial; exit 2"), Mode::Suppressed, &RunOptions::new())
            .unwrap_err();
        match err {
            ExecutionError::ProcessFailed { code, stdout, .. } => {
                assert_eq!(code, Some(2));
                assert_eq!(stdout, "partial\n");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let any = RunOptions::new().retcode(RetCode::Any);
        assert!(runner.run(&Process::new("false"), Mode::Foreground, &any).is_ok());
    }

    #[test]
    fn test_timeout_kills_the_child() {
        let runner = LocalRunner::default();
        let options = RunOptions::new().timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = runner
            .run(&Process::new("sleep").arg("5"), Mode::Suppressed, &options)
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let runner = LocalRunner::default();
        let err = runner
            .run(
                &Process::new("definitely-not-a-real-program-xyz"),
                Mode::Suppressed,
                &RunOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ExecutionError::CommandNotFound(_)));
        assert_eq!(err.label(), "CommandNotFound");
    }

    #[test]
    fn test_raised_token_interrupts_before_spawning() {
        let token = Arc::new(AtomicBool::new(true));
        let runner = LocalRunner::new(token);
        assert!(runner.interrupted());
        let err = runner
            .run(&Process::new("true"), Mode::Foreground, &RunOptions::new())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Interrupted));
    }

    #[test]
    fn test_stdin_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = LocalRunner::default();

        let echoed = finished(
            runner
                .run(&Process::new("cat").stdin("fed\n"), Mode::Suppressed, &RunOptions::new())
                .unwrap(),
        );
        assert_eq!(echoed.stdout.as_deref(), Some("fed\n"));

        let pwd = finished(
            runner
                .run(
                    &Process::new("pwd").current_dir(dir.path()),
                    Mode::Suppressed,
                    &RunOptions::new(),
                )
                .unwrap(),
        );
        let reported = pwd.stdout.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(reported.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[test]
    fn test_large_input_streams_through_cat() {
        let runner = LocalRunner::default();
        let input = "x".repeat(4 << 20);
        let options = RunOptions::new().timeout(Duration::from_secs(20));
        let result = finished(
            runner
                .run(&Process::new("cat").stdin(input.clone()), Mode::Suppressed, &options)
                .unwrap(),
        );
        assert_eq!(result.code, Some(0));
        assert_eq!(result.stdout.map(|out| out.len()), Some(input.len()));
    }

    #[test]
    fn test_timeout_applies_while_input_is_pending() {
        let runner = LocalRunner::default();
        let options = RunOptions::new().timeout(Duration::from_millis(200));
        let process = Process::new("sleep").arg("5").stdin("x".repeat(4 << 20));
        let started = Instant::now();
        let err = runner.run(&process, Mode::Suppressed, &options).unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_child_ignoring_its_input_still_succeeds() {
        let runner = LocalRunner::default();
        let process = Process::new("true").stdin("y".repeat(1 << 20));
        let result = finished(
            runner
                .run(&process, Mode::Foreground, &RunOptions::new())
                .unwrap(),
        );
        assert_eq!(result.code, Some(0));
    }

    #[test]
    fn test_chatty_background_process_runs_to_completion() {
        let runner = LocalRunner::default();
        let outcome = runner
            .run(&sh("yes | head -n 100000"), Mode::Background, &RunOptions::new())
            .unwrap();
        let mut handle = outcome.into_handle().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.is_running() {
            assert!(Instant::now() < deadline, "background process stalled");
            thread::sleep(Duration::from_millis(20));
        }
        let result = handle.wait().unwrap();
        assert_eq!(result.stdout.map(|out| out.len()), Some(200_000));
    }

    #[test]
    fn test_background_handle_waits_for_output() {
        let runner = LocalRunner::default();
        let outcome = runner
            .run(&sh("sleep 0.2; echo done"), Mode::Background, &RunOptions::new())
            .unwrap();
        let mut handle = outcome.into_handle().unwrap();
        assert!(handle.id() > 0);
        assert!(handle.is_running());
        let result = handle.wait().unwrap();
        assert_eq!(result.code, Some(0));
        assert_eq!(result.stdout.as_deref(), Some("done\n"));
    }
}
