//! Orchestrates one editor's runs: analyze, execute, test, validate.

use crate::analyzer::{assert_safe, check_size, sanitize};
use crate::challenge::{Challenge, ChallengeRegistry, Validation, ValidationInput};
use crate::config::SandboxConfig;
use crate::errors::{ErrorKind, Result, SandboxError};
use crate::harness::{Binding, ConsoleLine, Harness, Sandbox};
use crate::metrics::{check_memory_limit, estimate_memory, RunMetrics};
use crate::runner::run_test_cases;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the editor renders after a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    /// The code ran to completion. Whether it solved the challenge is in
    /// `validation`.
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(default)]
    pub console: Vec<ConsoleLine>,
    pub metrics: RunMetrics,
}

impl ExecutionResult {
    fn new(run_id: String, challenge_id: Option<&str>) -> Self {
        Self {
            run_id,
            challenge_id: challenge_id.map(str::to_string),
            success: false,
            result: None,
            error: None,
            error_kind: None,
            validation: None,
            console: Vec::new(),
            metrics: RunMetrics::default(),
        }
    }

    fn fail(mut self, error: SandboxError) -> Self {
        self.success = false;
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
        self
    }

    /// Whether the run completed and the challenge accepted it.
    pub fn solved(&self) -> bool {
        self.success && self.validation.as_ref().map(|v| v.success).unwrap_or(false)
    }
}

/// One editor instance: a registry plus a single-lane harness.
pub struct ChallengeSession {
    registry: ChallengeRegistry,
    harness: Harness,
    config: SandboxConfig,
}

impl ChallengeSession {
    /// Runs player code in `codequest-js-runner` child processes.
    pub fn new(registry: ChallengeRegistry, config: SandboxConfig) -> Self {
        let harness = Harness::new(config.clone());
        Self {
            registry,
            harness,
            config,
        }
    }

    pub fn with_harness(registry: ChallengeRegistry, harness: Harness) -> Self {
        let config = harness.config().clone();
        Self {
            registry,
            harness,
            config,
        }
    }

    pub fn registry(&self) -> &ChallengeRegistry {
        &self.registry
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Run player code against a registered challenge.
    ///
    /// Fails only when the challenge does not exist or another run is in
    /// flight. Every other problem is reported inside the result.
    pub async fn run_challenge(&self, id: &str, code: &str) -> Result<ExecutionResult> {
        let challenge = self
            .registry
            .get(id)
            .ok_or_else(|| SandboxError::ChallengeNotFound(id.to_string()))?;
        self.run(Some(challenge.as_ref()), code, BTreeMap::new()).await
    }

    /// Run free-form code with an optional context, outside any challenge.
    pub async fn run_code(
        &self,
        code: &str,
        context: BTreeMap<String, Binding>,
    ) -> Result<ExecutionResult> {
        self.run(None, code, context).await
    }

    async fn run(
        &self,
        challenge: Option<&Challenge>,
        code: &str,
        context: BTreeMap<String, Binding>,
    ) -> Result<ExecutionResult> {
        let mut slot = self.harness.begin()?;
        let run_id = Uuid::new_v4().to_string();
        let challenge_id = challenge.map(|c| c.id.as_str());
        info!(run_id = %run_id, challenge = ?challenge_id, "starting run");

        let outcome = ExecutionResult::new(run_id.clone(), challenge_id);

        if let Err(e) = check_size(code, self.config.max_code_size) {
            return Ok(outcome.fail(e));
        }
        let sanitized = sanitize(code);
        if let Err(e) = assert_safe(&sanitized) {
            warn!(run_id = %run_id, error = %e, "rejected player code");
            return Ok(outcome.fail(e));
        }

        let sandbox = match challenge {
            Some(challenge) => challenge.sandbox(),
            None => Sandbox::with_context(context),
        };
        let sandbox = match sandbox {
            Ok(sandbox) => sandbox,
            Err(e) => return Ok(outcome.fail(e)),
        };

        let timeout = challenge
            .map(|c| c.execution_time_limit)
            .unwrap_or_else(|| self.config.default_time_limit());
        let memory_limit = challenge
            .map(|c| c.memory_limit)
            .unwrap_or(self.config.default_memory_limit);
        let observed = challenge
            .map(|c| c.observed_bindings.as_slice())
            .unwrap_or_default();

        let started = Instant::now();
        let run = match slot
            .execute(&sanitized, &sandbox, observed, None, timeout)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                let mut outcome = outcome.fail(e);
                outcome.console = slot.take_console();
                outcome.metrics.execution_time = started.elapsed().as_millis() as u64;
                outcome.metrics.error_count = 1;
                info!(
                    run_id = %run_id,
                    error_kind = ?outcome.error_kind,
                    "run failed"
                );
                return Ok(outcome);
            }
        };

        let mut snapshot = run.bindings.clone();
        for (name, binding) in sandbox.context() {
            if let Binding::Value(value) = binding {
                snapshot.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        let memory_usage = estimate_memory(&snapshot);
        check_memory_limit(memory_usage, memory_limit);

        let test_results = match challenge {
            Some(challenge) if !challenge.test_cases.is_empty() => {
                run_test_cases(&mut slot, &sanitized, &challenge.test_cases, &sandbox, timeout)
                    .await
            }
            _ => Vec::new(),
        };

        let validation = challenge.map(|challenge| match &challenge.validator {
            Some(validator) => (validator.as_ref())(&ValidationInput {
                result: &run.result,
                bindings: &run.bindings,
                test_results: &test_results,
            }),
            None => Validation::from_test_results(&test_results),
        });

        let outcome = ExecutionResult {
            success: true,
            result: Some(run.result),
            validation,
            console: run.console,
            metrics: RunMetrics {
                execution_time: run.execution_time.as_millis() as u64,
                memory_usage,
                error_count: 0,
                test_results,
            },
            ..outcome
        };

        info!(
            run_id = %run_id,
            execution_time_ms = outcome.metrics.execution_time,
            solved = outcome.solved(),
            "run finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use serde_json::json;

    fn in_process(config: SandboxConfig) -> ChallengeSession {
        ChallengeSession::with_harness(ChallengeRegistry::with_builtins(), Harness::in_process(config))
    }

    fn session() -> ChallengeSession {
        in_process(SandboxConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_challenge() {
        let err = session().run_challenge("nope", "let a;").await.unwrap_err();
        assert!(matches!(err, SandboxError::ChallengeNotFound(_)));
    }

    #[tokio::test]
    async fn test_security_violation_rendered() {
        let result = session()
            .run_challenge(builtin::SECURITY_INITIALIZATION, "document.title = 'x';")
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SecurityViolation));
        assert!(result.validation.is_none());
    }

    #[tokio::test]
    async fn test_code_too_large_rendered() {
        let mut config = SandboxConfig::default();
        config.max_code_size = 8;
        let session = in_process(config);
        let result = session
            .run_code("let securityCode = 1;", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::CodeTooLarge));
    }

    #[tokio::test]
    async fn test_run_code_with_context() {
        let mut context = BTreeMap::new();
        context.insert("base".to_string(), Binding::from(json!(20)));
        let result = session()
            .run_code(
                "console.log('adding'); __challengeResult = base + 1;",
                context,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.result, Some(Value::Number(21.0)));
        assert_eq!(result.console.len(), 1);
        assert!(result.validation.is_none());
        assert_eq!(result.metrics.memory_usage, 8);
    }

    #[tokio::test]
    async fn test_serializes_camel_case() {
        let result = session()
            .run_challenge(builtin::SECURITY_INITIALIZATION, "let securityCode = \"9876\";")
            .await
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["challengeId"], "security-initialization");
        assert!(json["runId"].is_string());
        assert!(json["metrics"]["testResults"].is_array());
        assert_eq!(json["validation"]["success"], true);
    }
}
