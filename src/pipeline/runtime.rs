use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long output is still collected after the process exits. A descendant
/// that inherited the pipes can keep them open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One external invocation. Arguments are passed straight to the process,
/// never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

pub trait PipelineCommandRunner: Send + Sync + 'static {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError>;
}

#[derive(Debug, Default, Clone)]
pub struct StdPipelineCommandRunner;

impl PipelineCommandRunner for StdPipelineCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
        let mut command = Command::new(spec.program.as_str());
        command
            .args(spec.args.iter().map(String::as_str))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| PipelineRuntimeError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let stdout = drain_pipe(child.stdout.take());
        let stderr = drain_pipe(child.stderr.take());

        let status_code = match spec.timeout {
            Some(limit) => wait_with_deadline(&mut child, limit).map_err(|err| match err {
                WaitError::Io(source) => PipelineRuntimeError::Wait {
                    program: spec.program.clone(),
                    source,
                },
                WaitError::Expired => PipelineRuntimeError::TimedOut {
                    program: spec.program.clone(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                },
            })?,
            None => child
                .wait()
                .map(|status| status.code().unwrap_or(-1))
                .map_err(|source| PipelineRuntimeError::Wait {
                    program: spec.program.clone(),
                    source,
                })?,
        };

        let drain_until = Instant::now() + PIPE_DRAIN_GRACE;
        Ok(CommandOutput {
            status_code,
            stdout: collect_pipe(stdout, drain_until, "stdout"),
            stderr: collect_pipe(stderr, drain_until, "stderr"),
        })
    }
}

enum WaitError {
    Io(std::io::Error),
    Expired,
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<i32, WaitError> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait().map_err(WaitError::Io)? {
            Some(status) => return Ok(status.code().unwrap_or(-1)),
            None if Instant::now() >= deadline => {
                // Reap after kill so no zombie outlives the request.
                let _ = child.kill();
                let _ = child.wait();
                return Err(WaitError::Expired);
            }
            None => thread::sleep(WAIT_POLL_INTERVAL),
        }
    }
}

fn drain_pipe<R>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut reader| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

/// The reader thread is abandoned when the pipe is still open at
/// `until`; it ends on its own once the last writer exits.
fn collect_pipe(pipe: Option<Receiver<Vec<u8>>>, until: Instant, name: &str) -> String {
    let Some(rx) = pipe else {
        return String::new();
    };
    match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
        Ok(bytes) => String::from_utf8_lossy(bytes.as_slice()).into_owned(),
        Err(_) => {
            debug!(pipe = name, "output pipe still held open after exit; discarding it");
            String::new()
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineRuntimeError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting on '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' did not exit within {timeout_ms} ms")]
    TimedOut { program: String, timeout_ms: u64 },
}
