//! The Boa interpreter.
//!
//! [`run_script`] evaluates a script in a fresh realm that has the
//! ECMAScript built-ins and nothing else: no DOM, network, storage, module
//! loader or host process. The loop and recursion limits end some runaway
//! code early, but the loop limit counts per loop, so many short loops can
//! run far past it. Only ending the host process stops a run for sure, which
//! is what [`crate::process::ProcessEngine`] does.
//!
//! [`BoaEngine`] runs the interpreter on a thread of the current process.
//! It cannot interrupt a run: on timeout the thread is abandoned and keeps
//! its [`RunTicket`] until it exits.

use crate::config::ResourceLimits;
use crate::engine::{EngineCapabilities, ExecutionOptions, RunTicket, ScriptEngine};
use crate::errors::{Result, SandboxError};
use async_trait::async_trait;
use boa_engine::error::JsNativeErrorKind;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsError, Source};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// In-process engine for trusted code and tests.
pub struct BoaEngine {
    limits: ResourceLimits,
}

impl BoaEngine {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl Default for BoaEngine {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

/// Evaluate `script` in a fresh realm and return the string it completes
/// with. Blocks the calling thread for the whole run.
pub fn run_script(script: &str, limits: &ResourceLimits) -> Result<String> {
    let mut context = Context::default();

    let mut runtime = RuntimeLimits::default();
    runtime.set_loop_iteration_limit(limits.loop_iteration_limit);
    runtime.set_recursion_limit(limits.recursion_limit);
    runtime.set_stack_size_limit(limits.stack_size_limit);
    context.set_runtime_limits(runtime);

    let value = context
        .eval(Source::from_bytes(script.as_bytes()))
        .map_err(classify)?;

    value
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| {
            SandboxError::InternalError("script did not complete with a string".to_string())
        })
}

fn classify(err: JsError) -> SandboxError {
    if let Some(native) = err.as_native() {
        match &native.kind {
            JsNativeErrorKind::RuntimeLimit => {
                return SandboxError::ResourceLimit(native.message().to_string())
            }
            JsNativeErrorKind::Syntax => return SandboxError::Syntax(native.message().to_string()),
            _ => {}
        }
    }
    SandboxError::Runtime(err.to_string())
}

#[async_trait]
impl ScriptEngine for BoaEngine {
    async fn evaluate(
        &self,
        script: String,
        options: &ExecutionOptions,
        ticket: RunTicket,
    ) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        let limits = options.limits.clone();

        std::thread::Builder::new()
            .name("codequest-js".to_string())
            .stack_size(limits.thread_stack_bytes)
            .spawn(move || {
                // Held until the interpreter returns, even if nobody is waiting.
                let _ticket = ticket;
                let outcome = run_script(&script, &limits);
                if tx.send(outcome).is_err() {
                    debug!("interpreter finished after its run was abandoned");
                }
            })?;

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SandboxError::InternalError(
                "interpreter thread exited without a result".to_string(),
            )),
            Err(_) => {
                warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    "run exceeded its time limit, abandoning interpreter thread"
                );
                Err(SandboxError::Timeout {
                    timeout_ms: options.timeout.as_millis() as u64,
                })
            }
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            name: "Boa (in process)".to_string(),
            host_bindings: false,
            preemptive_timeout: false,
            loop_iteration_limit: self.limits.loop_iteration_limit,
            recursion_limit: self.limits.recursion_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn ticket() -> RunTicket {
        let slot = Arc::new(Semaphore::new(1));
        RunTicket::new(slot.acquire_owned().await.unwrap())
    }

    fn options(timeout_ms: u64) -> ExecutionOptions {
        ExecutionOptions {
            timeout: Duration::from_millis(timeout_ms),
            limits: ResourceLimits::default(),
        }
    }

    #[tokio::test]
    async fn test_evaluates_to_string() {
        let engine = BoaEngine::default();
        let out = engine
            .evaluate(
                "JSON.stringify([1, 2].map(x => x * 2))".to_string(),
                &options(2000),
                ticket().await,
            )
            .await
            .unwrap();
        assert_eq!(out, "[2,4]");
    }

    #[tokio::test]
    async fn test_syntax_error_classified() {
        let engine = BoaEngine::default();
        let err = engine
            .evaluate("let = ;".to_string(), &options(2000), ticket().await)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Syntax(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_loop_limit_classified() {
        let engine = BoaEngine::default();
        let mut opts = options(10_000);
        opts.limits.loop_iteration_limit = 1_000;
        let err = engine
            .evaluate("for (;;) {} 'done'".to_string(), &opts, ticket().await)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ResourceLimit(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_no_host_globals() {
        let engine = BoaEngine::default();
        let out = engine
            .evaluate(
                "[typeof window, typeof document, typeof fetch, typeof require].join(',')"
                    .to_string(),
                &options(2000),
                ticket().await,
            )
            .await
            .unwrap();
        assert_eq!(out, "undefined,undefined,undefined,undefined");
    }

    #[tokio::test]
    async fn test_timeout_keeps_ticket_until_thread_exits() {
        let engine = BoaEngine::default();
        let slot = Arc::new(Semaphore::new(1));
        let permit = RunTicket::new(slot.clone().acquire_owned().await.unwrap());

        let mut opts = options(20);
        opts.limits.loop_iteration_limit = 200_000_000;
        let err = engine
            .evaluate("for (;;) {} 'done'".to_string(), &opts, permit)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { timeout_ms: 20 }));
        assert_eq!(slot.available_permits(), 0);
    }
}
