//! Script engine that runs every evaluation in a child process.
//!
//! The interpreter cannot be interrupted from outside once it is running, so
//! the only reliable way to end a runaway run is to end the process hosting
//! it. [`ProcessEngine`] spawns the `codequest-js-runner` binary, sends it the
//! script on stdin and kills it when the time limit passes. The execution slot
//! is released only after the child has been reaped.

use crate::config::ResourceLimits;
use crate::engine::{EngineCapabilities, ExecutionOptions, RunTicket, ScriptEngine};
use crate::errors::{ErrorKind, Result, SandboxError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// File name of the runner binary, without platform suffix.
pub const RUNNER_BINARY: &str = "codequest-js-runner";

/// Environment variable pointing at the runner binary.
pub const RUNNER_ENV: &str = "CODEQUEST_JS_RUNNER";

/// What the engine sends to the runner on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRequest {
    pub script: String,
    pub limits: ResourceLimits,
}

/// What the runner prints on stdout before exiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunnerReply {
    Completed { output: String },
    Failed { kind: ErrorKind, message: String },
}

impl From<Result<String>> for RunnerReply {
    fn from(outcome: Result<String>) -> Self {
        match outcome {
            Ok(output) => RunnerReply::Completed { output },
            Err(err) => {
                let kind = err.kind();
                let message = match err {
                    SandboxError::Syntax(m)
                    | SandboxError::Runtime(m)
                    | SandboxError::ResourceLimit(m) => m,
                    other => other.to_string(),
                };
                RunnerReply::Failed { kind, message }
            }
        }
    }
}

impl RunnerReply {
    pub fn into_result(self) -> Result<String> {
        match self {
            RunnerReply::Completed { output } => Ok(output),
            RunnerReply::Failed { kind, message } => Err(match kind {
                ErrorKind::Syntax => SandboxError::Syntax(message),
                ErrorKind::ResourceLimit => SandboxError::ResourceLimit(message),
                ErrorKind::Runtime => SandboxError::Runtime(message),
                _ => SandboxError::InternalError(message),
            }),
        }
    }
}

/// Find the runner binary.
///
/// Lookup order: the configured path, `CODEQUEST_JS_RUNNER`, the directory of
/// the current executable and its parent (covers `target/*/deps` and
/// `target/*/examples`), then `PATH`.
pub fn locate_runner(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(RUNNER_ENV) {
        return Ok(PathBuf::from(path));
    }

    let file_name = format!("{}{}", RUNNER_BINARY, std::env::consts::EXE_SUFFIX);
    if let Ok(exe) = std::env::current_exe() {
        let candidates = exe
            .ancestors()
            .skip(1)
            .take(2)
            .map(|dir| dir.join(&file_name));
        for candidate in candidates {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    which::which(RUNNER_BINARY).map_err(|_| {
        SandboxError::InternalError(format!(
            "{} not found; set {} or runner_path in the sandbox config",
            RUNNER_BINARY, RUNNER_ENV
        ))
    })
}

pub struct ProcessEngine {
    runner: Option<PathBuf>,
    limits: ResourceLimits,
}

impl ProcessEngine {
    /// `runner` overrides discovery through [`locate_runner`].
    pub fn new(runner: Option<PathBuf>, limits: ResourceLimits) -> Self {
        Self { runner, limits }
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(None, ResourceLimits::default())
    }
}

fn decode_reply(stdout: &[u8], stderr: &[u8], status: ExitStatus) -> Result<String> {
    match serde_json::from_slice::<RunnerReply>(stdout) {
        Ok(reply) => reply.into_result(),
        // A native stack overflow or allocation failure aborts the runner
        // before it can reply.
        Err(_) if !status.success() => Err(SandboxError::ResourceLimit(format!(
            "interpreter process exited abnormally ({}): {}",
            status,
            String::from_utf8_lossy(stderr).trim()
        ))),
        Err(e) => Err(SandboxError::InternalError(format!(
            "unreadable runner reply: {}",
            e
        ))),
    }
}

#[async_trait]
impl ScriptEngine for ProcessEngine {
    async fn evaluate(
        &self,
        script: String,
        options: &ExecutionOptions,
        ticket: RunTicket,
    ) -> Result<String> {
        let runner = locate_runner(self.runner.as_deref())?;
        let request = serde_json::to_vec(&RunnerRequest {
            script,
            limits: options.limits.clone(),
        })?;

        let mut child = Command::new(&runner)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) = pipes else {
            return Err(SandboxError::InternalError(
                "runner pipes unavailable".to_string(),
            ));
        };

        let exchange = async move {
            stdin.write_all(&request).await?;
            drop(stdin);
            let mut out = Vec::new();
            let mut err = Vec::new();
            tokio::try_join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err))?;
            Ok::<_, std::io::Error>((out, err))
        };

        let (out, err) = match tokio::time::timeout(options.timeout, exchange).await {
            Ok(Ok(io)) => io,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    pid = ?child.id(),
                    "run exceeded its time limit, killing runner"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill runner process");
                }
                drop(ticket);
                return Err(SandboxError::Timeout {
                    timeout_ms: options.timeout.as_millis() as u64,
                });
            }
        };

        let status = child.wait().await?;
        drop(ticket);
        debug!(%status, bytes = out.len(), "runner finished");
        decode_reply(&out, &err, status)
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            name: "Boa (runner process)".to_string(),
            host_bindings: false,
            preemptive_timeout: true,
            loop_iteration_limit: self.limits.loop_iteration_limit,
            recursion_limit: self.limits.recursion_limit,
        }
    }
}
