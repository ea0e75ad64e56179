//! Command execution against containers.
//!
//! The cluster control plane is reached through an [`ExecTransport`], a
//! primitive that runs one command vector with the given stdio streams and
//! reports completion. [`ExecRunner`] builds the two modes the container
//! backend needs on top of it:
//!
//! - synchronous: the caller blocks until the command exits, stdout and
//!   stderr are buffered, failures carry the captured text;
//! - streaming download: the command's stdout is wired into a [`pipe`] by a
//!   background thread and the caller reads the other end. The thread always
//!   drops the write end when the command finishes, so the reader sees
//!   end-of-stream instead of hanging.

pub mod pipe;
pub mod process;

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::VfsError;

pub use pipe::{PipeReader, PipeWriter};
pub use process::ProcessExec;

/// Default deadline for remote calls (five minutes).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Errors raised while executing a remote command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The exec channel could not be established.
    #[error("failed to start remote command: {0}")]
    Spawn(String),

    /// The command ran and exited unsuccessfully.
    #[error("remote command exited with status {0}")]
    ExitStatus(i32),

    /// The command did not finish in time.
    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    /// Copying one of the stdio streams failed.
    #[error("exec stream error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure together with what the command printed.
    #[error("{source}: {output}")]
    WithOutput {
        /// Underlying failure.
        #[source]
        source: Box<ExecError>,
        /// Captured stderr, or stdout when stderr was empty.
        output: String,
    },
}

impl ExecError {
    fn is_timeout(&self) -> bool {
        match self {
            ExecError::Timeout(_) => true,
            ExecError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            ExecError::WithOutput { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<ExecError> for VfsError {
    fn from(err: ExecError) -> Self {
        if err.is_timeout() {
            return VfsError::Timeout(err.to_string());
        }
        match err {
            ExecError::Spawn(msg) => VfsError::BackendUnavailable(msg),
            ExecError::Io(e) => VfsError::from(e),
            other => VfsError::from_remote_text(&other.to_string()),
        }
    }
}

/// One command execution request.
pub struct ExecRequest<'a> {
    /// Argument vector, program first.
    pub command: &'a [String],
    /// Data fed to the command's stdin, if any.
    pub stdin: Option<&'a mut dyn Read>,
    /// Destination of the command's stdout.
    pub stdout: &'a mut (dyn Write + Send),
    /// Destination of the command's stderr.
    pub stderr: &'a mut (dyn Write + Send),
    /// Allocate a terminal for the command.
    pub tty: bool,
    /// How long the command may sit idle, `None` for unbounded.
    ///
    /// Idle time runs from the last chunk delivered to stdin, or from the
    /// start when there is no stdin.
    pub deadline: Option<Duration>,
}

/// The control-plane exec primitive.
pub trait ExecTransport: Send + Sync {
    /// Run the request to completion.
    fn exec(&self, request: ExecRequest<'_>) -> Result<(), ExecError>;
}

/// Runs commands against one container.
#[derive(Clone)]
pub struct ExecRunner {
    transport: Arc<dyn ExecTransport>,
    deadline: Duration,
}

impl ExecRunner {
    /// Create a runner using [`DEFAULT_DEADLINE`].
    pub fn new(transport: Arc<dyn ExecTransport>) -> Self {
        Self {
            transport,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Set the deadline applied to synchronous commands and stream reads.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// The configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run a command to completion and return its stdout.
    pub fn run(&self, command: &[String]) -> Result<Vec<u8>, ExecError> {
        debug!(command = ?command, "exec");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = self.transport.exec(ExecRequest {
            command,
            stdin: None,
            stdout: &mut stdout,
            stderr: &mut stderr,
            tty: false,
            deadline: Some(self.deadline),
        });
        match result {
            Ok(()) => Ok(stdout),
            Err(e) => Err(attach_output(e, &stdout, &stderr)),
        }
    }

    /// Run a command feeding it `stdin`, discarding stdout.
    ///
    /// The deadline restarts with every chunk of `stdin`, so a large upload
    /// may run longer than it; once `stdin` ends the command must exit
    /// within it.
    pub fn run_with_stdin(&self, command: &[String], stdin: &mut dyn Read) -> Result<(), ExecError> {
        debug!(command = ?command, "exec with stdin");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = self.transport.exec(ExecRequest {
            command,
            stdin: Some(stdin),
            stdout: &mut stdout,
            stderr: &mut stderr,
            tty: false,
            deadline: Some(self.deadline),
        });
        result.map_err(|e| attach_output(e, &stdout, &stderr))
    }

    /// Start a command in the background and stream its stdout.
    ///
    /// The exit status is not observable; the caller only sees the stream
    /// end. Dropping the returned reader stops the command at its next write.
    pub fn stream(&self, command: Vec<String>) -> Result<PipeReader, ExecError> {
        debug!(command = ?command, "exec stream");
        let (mut writer, reader) = pipe::pipe(self.deadline);
        let transport = Arc::clone(&self.transport);
        thread::Builder::new()
            .name("exec-stream".to_string())
            .spawn(move || {
                let mut stderr = Vec::new();
                let result = transport.exec(ExecRequest {
                    command: &command,
                    stdin: None,
                    stdout: &mut writer,
                    stderr: &mut stderr,
                    tty: false,
                    deadline: None,
                });
                if let Err(e) = result {
                    let e = attach_output(e, &[], &stderr);
                    warn!(command = ?command, error = %e, "Streaming exec ended with error");
                }
                drop(writer);
            })
            .map_err(|e| ExecError::Spawn(e.to_string()))?;
        Ok(reader)
    }
}

/// Attach captured output to an error; stderr wins over stdout.
fn attach_output(err: ExecError, stdout: &[u8], stderr: &[u8]) -> ExecError {
    let output = if !stderr.is_empty() {
        String::from_utf8_lossy(stderr)
    } else if !stdout.is_empty() {
        String::from_utf8_lossy(stdout)
    } else {
        return err;
    };
    ExecError::WithOutput {
        source: Box::new(err),
        output: output.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Scripted transport: fixed stdout/stderr and result.
    struct Scripted {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        fail: bool,
        seen: Mutex<Vec<Vec<String>>>,
        deadlines: Mutex<Vec<Option<Duration>>>,
    }

    impl Scripted {
        fn new(stdout: &[u8], stderr: &[u8], fail: bool) -> Self {
            Self {
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
                fail,
                seen: Mutex::new(Vec::new()),
                deadlines: Mutex::new(Vec::new()),
            }
        }
    }

    impl ExecTransport for Scripted {
        fn exec(&self, request: ExecRequest<'_>) -> Result<(), ExecError> {
            self.seen.lock().unwrap().push(request.command.to_vec());
            self.deadlines.lock().unwrap().push(request.deadline);
            request.stdout.write_all(&self.stdout)?;
            request.stderr.write_all(&self.stderr)?;
            if self.fail {
                Err(ExecError::ExitStatus(2))
            } else {
                Ok(())
            }
        }
    }

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_run_returns_stdout() {
        let transport = Arc::new(Scripted::new(b"hello\n", b"", false));
        let runner = ExecRunner::new(transport.clone());
        let out = runner.run(&cmd(&["echo", "hello"])).unwrap();
        assert_eq!(out, b"hello\n");
        assert_eq!(transport.seen.lock().unwrap()[0], cmd(&["echo", "hello"]));
    }

    #[test]
    fn test_run_error_prefers_stderr() {
        let transport = Arc::new(Scripted::new(b"partial", b"ls: cannot access '/x': No such file or directory", true));
        let runner = ExecRunner::new(transport);
        let err = runner.run(&cmd(&["ls", "/x"])).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("No such file"));
        assert!(!text.contains("partial"));

        let vfs: VfsError = err.into();
        assert!(vfs.is_not_found());
    }

    #[test]
    fn test_run_error_falls_back_to_stdout() {
        let transport = Arc::new(Scripted::new(b"usage: ls", b"", true));
        let runner = ExecRunner::new(transport);
        let err = runner.run(&cmd(&["ls"])).unwrap_err();
        assert!(err.to_string().contains("usage: ls"));
    }

    #[test]
    fn test_run_with_stdin_carries_deadline() {
        let transport = Arc::new(Scripted::new(b"", b"", false));
        let runner = ExecRunner::new(transport.clone()).with_deadline(Duration::from_secs(7));
        let mut input: &[u8] = b"payload";
        runner.run_with_stdin(&cmd(&["dd", "of=/f"]), &mut input).unwrap();
        assert_eq!(
            transport.deadlines.lock().unwrap()[0],
            Some(Duration::from_secs(7))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_stalled_upload_times_out() {
        let runner = ExecRunner::new(Arc::new(ProcessExec::new("env", Vec::new())))
            .with_deadline(Duration::from_millis(200));
        let mut input: &[u8] = b"payload";
        let started = Instant::now();
        let err = runner
            .run_with_stdin(&cmd(&["sh", "-c", "cat >/dev/null; exec sleep 3"]), &mut input)
            .unwrap_err();
        assert!(matches!(VfsError::from(err), VfsError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_timeout_maps_to_vfs_timeout() {
        let err = ExecError::WithOutput {
            source: Box::new(ExecError::Timeout(Duration::from_secs(1))),
            output: "killed".to_string(),
        };
        assert!(matches!(VfsError::from(err), VfsError::Timeout(_)));
    }

    #[test]
    fn test_stream_delivers_output() {
        let transport = Arc::new(Scripted::new(b"file contents", b"", false));
        let runner = ExecRunner::new(transport);
        let mut reader = runner.stream(cmd(&["cat", "/f"])).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "file contents");
    }

    #[test]
    fn test_stream_of_silent_command_ends_immediately() {
        let transport = Arc::new(Scripted::new(b"", b"", false));
        let runner = ExecRunner::new(transport).with_deadline(Duration::from_secs(30));
        let started = Instant::now();
        let mut reader = runner.stream(cmd(&["true"])).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_stream_of_failing_command_still_ends() {
        let transport = Arc::new(Scripted::new(b"", b"cat: /f: No such file or directory", true));
        let runner = ExecRunner::new(transport);
        let mut reader = runner.stream(cmd(&["cat", "/f"])).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
