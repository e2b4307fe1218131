use crate::config::ResourceLimits;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;

/// Options for a single script evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Wall clock timeout
    pub timeout: Duration,
    /// Interpreter limits
    pub limits: ResourceLimits,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(crate::config::DEFAULT_TIME_LIMIT_MS),
            limits: ResourceLimits::default(),
        }
    }
}

/// Capabilities of a script engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine name
    pub name: String,
    /// Whether the realm exposes any host bindings (DOM, network, storage)
    pub host_bindings: bool,
    /// Whether a run can be stopped before it finishes on its own
    pub preemptive_timeout: bool,
    /// Loop iteration limit enforced inside the interpreter
    pub loop_iteration_limit: u64,
    /// Maximum call depth
    pub recursion_limit: usize,
}

/// Proof that the caller holds the editor's execution slot.
///
/// Engines keep a clone alive for as long as the interpreter is running, so
/// a run abandoned after a timeout still blocks the next one until it
/// actually stops.
#[derive(Debug, Clone)]
pub struct RunTicket(#[allow(dead_code)] Arc<OwnedSemaphorePermit>);

impl RunTicket {
    pub(crate) fn new(permit: OwnedSemaphorePermit) -> Self {
        Self(Arc::new(permit))
    }
}

/// Trait for JavaScript execution engines
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Evaluate a complete script in a fresh realm and return the string it
    /// completes with.
    async fn evaluate(
        &self,
        script: String,
        options: &ExecutionOptions,
        ticket: RunTicket,
    ) -> Result<String>;

    /// Get engine capabilities
    fn capabilities(&self) -> EngineCapabilities;
}
