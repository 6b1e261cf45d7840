//! Timeout-bounded subprocess execution.
//!
//! Commands are spawned directly, never through a shell, so arguments reach
//! the program exactly as tokenized. Standard output and standard error share
//! one pipe, so the combined buffer keeps the order the bytes were written.

use std::io::Read;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use os_pipe::PipeReader;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::metrics;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error while running {program:?}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command execution timed out after {0:?} and was killed")]
    TimedOut(Duration),
    #[error("process exited with non-zero code: {0}")]
    NonZeroExit(i32),
    #[error("process terminated by signal")]
    Signal,
}

#[derive(Debug)]
pub enum ExecOutcome {
    /// Execution disabled by debug mode. Counts as success.
    Skipped,
    Succeeded,
    Failed(ExecError),
}

/// Combined output and outcome of one command run.
#[derive(Debug)]
pub struct ExecReport {
    pub output: Vec<u8>,
    pub outcome: ExecOutcome,
}

impl ExecReport {
    pub fn skipped() -> Self {
        Self {
            output: Vec::new(),
            outcome: ExecOutcome::Skipped,
        }
    }

    pub fn failed(error: ExecError) -> Self {
        Self {
            output: Vec::new(),
            outcome: ExecOutcome::Failed(error),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, ExecOutcome::Failed(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and report its combined output.
    async fn run(&self, program: &str, args: &[String]) -> ExecReport;
}

/// Runs handler commands as OS subprocesses.
pub struct ProcessExecutor {
    debug: bool,
    timeout: Duration,
    permits: Option<Arc<Semaphore>>,
}

impl ProcessExecutor {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            debug: config.debug,
            timeout: config.timeout,
            permits: config
                .max_concurrent_commands
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
        }
    }

    async fn spawn_and_wait(&self, program: &str, args: &[String]) -> ExecReport {
        let io_error = |source| {
            ExecReport::failed(ExecError::Io {
                program: program.to_string(),
                source,
            })
        };
        let (reader, stdout) = match os_pipe::pipe() {
            Ok(pipe) => pipe,
            Err(source) => return io_error(source),
        };
        let stderr = match stdout.try_clone() {
            Ok(writer) => writer,
            Err(source) => return io_error(source),
        };

        // The Command temporary owns the parent's copies of the write end and
        // must be gone before reading, or the reader never sees EOF.
        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                return ExecReport::failed(ExecError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
        };

        let reading = tokio::task::spawn_blocking(move || drain(reader));
        let completion = async {
            let output = match reading.await {
                Ok(output) => output,
                Err(e) => {
                    debug!(program, "output reader task failed: {e}");
                    Vec::new()
                }
            };
            let status = child.wait().await;
            (output, status)
        };
        let raced = tokio::time::timeout(self.timeout, completion).await;

        match raced {
            Ok((output, Ok(status))) => ExecReport {
                output,
                outcome: exit_outcome(status),
            },
            Ok((output, Err(source))) => ExecReport {
                output,
                outcome: ExecOutcome::Failed(ExecError::Io {
                    program: program.to_string(),
                    source,
                }),
            },
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!(program, "failed to kill subprocess: {e}");
                }
                ExecReport::failed(ExecError::TimedOut(self.timeout))
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, program: &str, args: &[String]) -> ExecReport {
        if self.debug {
            info!(program, ?args, "debug mode, not executing command");
            return ExecReport::skipped();
        }

        let _permit = match &self.permits {
            Some(permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        };

        let start = Instant::now();
        let report = self.spawn_and_wait(program, args).await;
        let elapsed = start.elapsed();
        metrics::COMMAND_DURATION_SECONDS.observe(elapsed.as_secs_f64());

        match &report.outcome {
            ExecOutcome::Failed(e) => {
                warn!(program, ?args, elapsed = ?elapsed, "command failed: {e}");
            }
            _ => info!(program, ?args, elapsed = ?elapsed, "command ran successfully"),
        }
        report
    }
}

fn exit_outcome(status: ExitStatus) -> ExecOutcome {
    if status.success() {
        ExecOutcome::Succeeded
    } else {
        match status.code() {
            Some(code) => ExecOutcome::Failed(ExecError::NonZeroExit(code)),
            None => ExecOutcome::Failed(ExecError::Signal),
        }
    }
}

/// Read the shared output pipe until every writer has closed it.
fn drain(mut reader: PipeReader) -> Vec<u8> {
    let mut output = Vec::new();
    // Bytes read before a failure are kept in `output`.
    if let Err(e) = reader.read_to_end(&mut output) {
        debug!("stopped reading subprocess output: {e}");
    }
    output
}
