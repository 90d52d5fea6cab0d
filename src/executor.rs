//! Process executor.
//!
//! Runs the interpreter on one script with a deadline. The child's exit is
//! raced against a timer on a single-threaded tokio runtime; if the timer
//! wins the child is killed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep draining pipes after the child has exited or been killed.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to wait for process: {0}")]
    Wait(std::io::Error),
}

/// Everything observable about one interpreter run.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code if the process exited normally.
    pub exit_code: Option<i32>,
    /// Signal number if the process was terminated by a signal (Unix only).
    pub signal: Option<i32>,
    /// The deadline fired and the process was killed.
    pub timed_out: bool,
}

/// Interpreter process settings shared by every run.
#[derive(Debug, Clone)]
pub struct ProcessEnv {
    pub vars: HashMap<String, String>,
    pub inherit: bool,
}

impl Default for ProcessEnv {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            inherit: true,
        }
    }
}

pub struct Executor {
    runtime: tokio::runtime::Runtime,
    timeout: Duration,
    env: ProcessEnv,
}

impl Executor {
    pub fn new(timeout: Duration, env: ProcessEnv) -> Result<Self, ExecError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExecError::Runtime)?;
        Ok(Self {
            runtime,
            timeout,
            env,
        })
    }

    /// Run `program script` to completion or until the timeout.
    pub fn run(
        &self,
        program: &Path,
        script: &str,
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, ExecError> {
        self.runtime
            .block_on(run_process(program, script, stdin, self.timeout, &self.env))
    }
}

async fn run_process(
    program: &Path,
    script: &str,
    stdin: Option<&[u8]>,
    timeout: Duration,
    env: &ProcessEnv,
) -> Result<ExecOutput, ExecError> {
    let mut cmd = Command::new(program);
    cmd.arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !env.inherit {
        cmd.env_clear();
    }
    cmd.envs(&env.vars);

    debug!(program = %program.display(), script, "spawning interpreter");
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    let stdout_capture = child.stdout.take().map(Capture::spawn);
    let stderr_capture = child.stderr.take().map(Capture::spawn);

    // Stdin is always closed so a script reading it sees end of input.
    if let Some(mut pipe) = child.stdin.take() {
        let input = stdin.map(<[u8]>::to_vec).unwrap_or_default();
        tokio::spawn(async move {
            if !input.is_empty()
                && let Err(err) = pipe.write_all(&input).await
            {
                debug!(error = %err, "interpreter closed stdin early");
            }
            drop(pipe);
        });
    }

    let status: Option<ExitStatus> = tokio::select! {
        result = child.wait() => Some(result.map_err(ExecError::Wait)?),
        () = tokio::time::sleep(timeout) => None,
    };

    let timed_out = status.is_none();
    if timed_out {
        warn!(script, timeout_sec = timeout.as_secs_f64(), "process timed out; killing");
        if let Err(err) = child.kill().await {
            warn!(script, error = %err, "failed to kill timed-out process");
        }
    }

    let (stdout, stderr) = tokio::join!(
        collect(stdout_capture, "stdout"),
        collect(stderr_capture, "stderr"),
    );

    let (exit_code, signal) = match status {
        Some(status) => (status.code(), exit_signal(&status)),
        None => (None, None),
    };

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
        signal,
        timed_out,
    })
}

/// One output pipe being drained by a background task.
///
/// The buffer is shared so bytes read before the capture deadline survive
/// when a grandchild keeps the pipe open.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Capture {
    fn spawn<R: AsyncRead + Unpin + Send + 'static>(reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(read_chunks(reader, Arc::clone(&buf)));
        Self { buf, task }
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn read_chunks<R: AsyncRead + Unpin>(
    mut reader: R,
    buf: Arc<Mutex<Vec<u8>>>,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk[..n]);
    }
}

/// Wait up to [`IO_CAPTURE_TIMEOUT`] for a pipe to close, then return
/// whatever was read.
async fn collect(capture: Option<Capture>, stream: &str) -> Vec<u8> {
    let Some(mut capture) = capture else {
        return Vec::new();
    };
    match tokio::time::timeout(IO_CAPTURE_TIMEOUT, &mut capture.task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(stream, error = %err, "output capture failed"),
        Ok(Err(err)) => warn!(stream, error = %err, "output capture task panicked"),
        Err(_) => {
            warn!(stream, "pipe still open after exit; keeping partial output");
            capture.task.abort();
        }
    }
    capture.take()
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
