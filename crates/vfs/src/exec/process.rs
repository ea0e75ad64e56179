//! Exec transport backed by a local program.
//!
//! The usual program is `kubectl`, which forwards the command vector to the
//! cluster's exec subresource. Any prefix works: with program `env` and no
//! prefix arguments the command runs on the gateway host itself.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::ContainerOptions;
use crate::exec::{ExecError, ExecRequest, ExecTransport};

/// Interval between exit-status polls while a deadline is pending.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs each command as `<program> <prefix args...> <command...>`.
#[derive(Debug, Clone)]
pub struct ProcessExec {
    program: PathBuf,
    prefix: Vec<String>,
}

impl ProcessExec {
    /// Create a transport from a program and its fixed leading arguments.
    pub fn new(program: impl Into<PathBuf>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
        }
    }

    /// Transport that execs into the container described by `options`.
    pub fn kubectl(program: impl Into<PathBuf>, options: &ContainerOptions) -> Self {
        let mut prefix = Vec::new();
        if !options.host.is_empty() {
            prefix.push(format!("--server={}", options.host));
        }
        if !options.token.is_empty() {
            prefix.push(format!("--token={}", options.token));
        }
        if options.skip_tls_verify {
            prefix.push("--insecure-skip-tls-verify=true".to_string());
        }
        prefix.extend([
            "exec".to_string(),
            "-i".to_string(),
            "-n".to_string(),
            options.namespace.clone(),
            options.pod_name.clone(),
        ]);
        if !options.container_name.is_empty() {
            prefix.push("-c".to_string());
            prefix.push(options.container_name.clone());
        }
        prefix.push("--".to_string());
        Self::new(program, prefix)
    }

    /// Program that is spawned.
    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Fixed arguments placed before each command.
    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }
}

impl ExecTransport for ProcessExec {
    fn exec(&self, request: ExecRequest<'_>) -> Result<(), ExecError> {
        if request.tty {
            return Err(ExecError::Spawn(
                "process transport cannot allocate a terminal".to_string(),
            ));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix)
            .args(request.command)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", self.program.display())))?;
        debug!(pid = child.id(), "Spawned exec process");

        let mut child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Spawn("stdout not captured".to_string()))?;
        let mut child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Spawn("stderr not captured".to_string()))?;
        let child_stdin = child.stdin.take();

        let ExecRequest {
            stdin,
            stdout,
            stderr,
            deadline,
            ..
        } = request;

        let activity = Activity::new();
        let (status, stdout_result, stdin_result) = thread::scope(|scope| {
            let out = scope.spawn(move || io::copy(&mut child_stdout, stdout));
            let err = scope.spawn(move || io::copy(&mut child_stderr, stderr));
            let waiter = scope.spawn(|| wait(child, deadline, &activity));

            let stdin_result = match (stdin, child_stdin) {
                (Some(src), Some(sink)) => feed_stdin(src, sink, &activity),
                _ => Ok(()),
            };
            activity.touch();

            let status = waiter
                .join()
                .unwrap_or_else(|_| Err(ExecError::Spawn("exec waiter panicked".to_string())));
            let stdout_result = out
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdout copy panicked")));
            if let Ok(Err(e)) = err.join() {
                warn!(error = %e, "Failed to collect exec stderr");
            }
            (status, stdout_result, stdin_result)
        });

        let status = status?;
        if !status.success() {
            return Err(ExecError::ExitStatus(status.code().unwrap_or(-1)));
        }
        stdin_result?;
        stdout_result?;
        Ok(())
    }
}

/// Time of the last progress on the child's stdin.
///
/// Stored as milliseconds since `origin` so the waiter can read it while the
/// feeding thread updates it.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

fn feed_stdin(src: &mut dyn Read, mut sink: ChildStdin, activity: &Activity) -> io::Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n])?;
        activity.touch();
    }
    sink.flush()
}

/// Wait for the child, killing it once it has been idle for `deadline`.
///
/// Idle time counts from the last chunk written to stdin, or from the end of
/// stdin, so a long upload is not cut short while a stalled one still ends.
fn wait(
    mut child: Child,
    deadline: Option<Duration>,
    activity: &Activity,
) -> Result<ExitStatus, ExecError> {
    let Some(deadline) = deadline else {
        return Ok(child.wait()?);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if activity.idle() >= deadline {
            if let Err(e) = child.kill() {
                warn!(error = %e, "Failed to kill timed out exec process");
            }
            let _ = child.wait();
            return Err(ExecError::Timeout(deadline));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn run(
        transport: &ProcessExec,
        command: &[String],
        stdin: Option<&mut dyn Read>,
        deadline: Option<Duration>,
    ) -> (Result<(), ExecError>, Vec<u8>, Vec<u8>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = transport.exec(ExecRequest {
            command,
            stdin: stdin.map(|s| -> &mut dyn Read { s }),
            stdout: &mut stdout,
            stderr: &mut stderr,
            tty: false,
            deadline,
        });
        (result, stdout, stderr)
    }

    #[test]
    fn test_captures_stdout() {
        let transport = ProcessExec::new("env", Vec::new());
        let (result, stdout, _) = run(&transport, &cmd(&["echo", "hi"]), None, None);
        result.unwrap();
        assert_eq!(stdout, b"hi\n");
    }

    #[test]
    fn test_feeds_stdin() {
        let transport = ProcessExec::new("env", Vec::new());
        let mut input: &[u8] = b"piped data";
        let (result, stdout, _) = run(&transport, &cmd(&["cat"]), Some(&mut input), None);
        result.unwrap();
        assert_eq!(stdout, b"piped data");
    }

    #[test]
    fn test_non_zero_exit() {
        let transport = ProcessExec::new("env", Vec::new());
        let (result, _, stderr) = run(&transport, &cmd(&["ls", "/definitely/not/here"]), None, None);
        assert!(matches!(result, Err(ExecError::ExitStatus(_))));
        assert!(!stderr.is_empty());
    }

    #[test]
    fn test_deadline_kills_process() {
        let transport = ProcessExec::new("env", Vec::new());
        let (result, _, _) = run(
            &transport,
            &cmd(&["sleep", "5"]),
            None,
            Some(Duration::from_millis(100)),
        );
        assert!(matches!(result, Err(ExecError::Timeout(_))));
    }

    #[test]
    fn test_deadline_applies_after_stdin_ends() {
        let transport = ProcessExec::new("env", Vec::new());
        let mut input: &[u8] = b"payload";
        let started = Instant::now();
        let (result, _, _) = run(
            &transport,
            &cmd(&["sh", "-c", "cat >/dev/null; exec sleep 3"]),
            Some(&mut input),
            Some(Duration::from_millis(200)),
        );
        assert!(matches!(result, Err(ExecError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// Delivers `chunks` pieces of data, pausing before each one.
    struct Trickle {
        chunks: usize,
        pause: Duration,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks == 0 {
                return Ok(0);
            }
            thread::sleep(self.pause);
            self.chunks -= 1;
            buf[0] = b'x';
            Ok(1)
        }
    }

    #[test]
    fn test_steady_stdin_outlives_deadline() {
        let transport = ProcessExec::new("env", Vec::new());
        let mut input = Trickle {
            chunks: 6,
            pause: Duration::from_millis(100),
        };
        let (result, stdout, _) = run(
            &transport,
            &cmd(&["cat"]),
            Some(&mut input),
            Some(Duration::from_millis(300)),
        );
        result.unwrap();
        assert_eq!(stdout, b"xxxxxx");
    }

    #[test]
    fn test_tty_rejected() {
        let transport = ProcessExec::new("env", Vec::new());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = transport.exec(ExecRequest {
            command: &cmd(&["true"]),
            stdin: None,
            stdout: &mut stdout,
            stderr: &mut stderr,
            tty: true,
            deadline: None,
        });
        assert!(matches!(result, Err(ExecError::Spawn(_))));
    }

    #[test]
    fn test_kubectl_arguments() {
        let options = ContainerOptions {
            host: "https://k8s.example:6443".to_string(),
            token: "t0ken".to_string(),
            system_user: "deploy".to_string(),
            namespace: "web".to_string(),
            pod_name: "nginx-7d9".to_string(),
            container_name: "nginx".to_string(),
            skip_tls_verify: true,
        };
        let transport = ProcessExec::kubectl("kubectl", &options);
        assert_eq!(
            transport.prefix(),
            &cmd(&[
                "--server=https://k8s.example:6443",
                "--token=t0ken",
                "--insecure-skip-tls-verify=true",
                "exec",
                "-i",
                "-n",
                "web",
                "nginx-7d9",
                "-c",
                "nginx",
                "--",
            ])[..]
        );
    }
}
