//! Test-case execution against fresh copies of the challenge sandbox.

use crate::analyzer::detect_entry_point;
use crate::harness::{ExecutionSlot, Lookup, LookupOutcome, Sandbox, RESULT_SLOT};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// What a test case inspects after the player code has run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum TestTarget {
    /// Call this function with the case input
    Function(String),
    /// Read this top-level binding
    Variable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub description: String,
    #[serde(default)]
    pub input: Option<Value>,
    pub expected: Value,
    #[serde(default)]
    pub target: Option<TestTarget>,
}

impl TestCase {
    /// A case that calls `function`. An array input is spread into arguments.
    pub fn calling(
        description: impl Into<String>,
        function: impl Into<String>,
        input: impl Into<Value>,
        expected: impl Into<Value>,
    ) -> Self {
        Self {
            description: description.into(),
            input: Some(input.into()),
            expected: expected.into(),
            target: Some(TestTarget::Function(function.into())),
        }
    }

    /// A case that reads the top-level binding `variable`.
    pub fn reading(
        description: impl Into<String>,
        variable: impl Into<String>,
        expected: impl Into<Value>,
    ) -> Self {
        Self {
            description: description.into(),
            input: None,
            expected: expected.into(),
            target: Some(TestTarget::Variable(variable.into())),
        }
    }

    /// Arguments for a function call: arrays are spread, anything else is a
    /// single argument, no input means no arguments.
    pub fn arguments(&self) -> Vec<Value> {
        match &self.input {
            Some(Value::Array(items)) => items.clone(),
            Some(value) => vec![value.clone()],
            None => Vec::new(),
        }
    }

    fn has_input(&self) -> bool {
        !matches!(self.input, None | Some(Value::Null) | Some(Value::Undefined))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    pub passed: bool,
    pub expected: Value,
    pub actual: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    fn failed(case: &TestCase, error: String) -> Self {
        Self {
            description: case.description.clone(),
            input: case.input.clone(),
            passed: false,
            expected: case.expected.clone(),
            actual: Value::Undefined,
            error: Some(error),
        }
    }
}

fn lookup_for(case: &TestCase, sanitized: &str) -> Result<Lookup, String> {
    match &case.target {
        Some(TestTarget::Function(name)) => Ok(Lookup::Call {
            function: name.clone(),
            args: case.arguments(),
        }),
        Some(TestTarget::Variable(name)) => Ok(Lookup::Read(name.clone())),
        None if case.has_input() => match detect_entry_point(sanitized) {
            Some(function) => {
                warn!(
                    case = %case.description,
                    function = %function,
                    "test case has no target, falling back to first declared function"
                );
                Ok(Lookup::Call {
                    function,
                    args: case.arguments(),
                })
            }
            None => Err("No function found to test".to_string()),
        },
        None => Ok(Lookup::Read(RESULT_SLOT.to_string())),
    }
}

/// Run every case in its own run against `base`. Never fails: per-case
/// problems, timeouts included, are reported in the case's result.
pub async fn run_test_cases(
    slot: &mut ExecutionSlot,
    sanitized: &str,
    cases: &[TestCase],
    base: &Sandbox,
    timeout: Duration,
) -> Vec<TestResult> {
    let mut results = Vec::with_capacity(cases.len());

    for case in cases {
        let lookup = match lookup_for(case, sanitized) {
            Ok(lookup) => lookup,
            Err(message) => {
                results.push(TestResult::failed(case, message));
                continue;
            }
        };

        // Each case builds a fresh script, so nothing carries over between cases.
        let result = match slot
            .execute(sanitized, base, &[], Some(&lookup), timeout)
            .await
        {
            Ok(run) => match run.lookup {
                Some(LookupOutcome::Value(actual)) => TestResult {
                    description: case.description.clone(),
                    input: case.input.clone(),
                    passed: actual.deep_eq(&case.expected),
                    expected: case.expected.clone(),
                    actual,
                    error: None,
                },
                Some(LookupOutcome::Missing(message)) => TestResult::failed(case, message),
                None => TestResult::failed(case, "test lookup produced no value".to_string()),
            },
            Err(e) => TestResult::failed(case, e.to_string()),
        };

        debug!(
            case = %result.description,
            passed = result.passed,
            actual = %result.actual.inspect(),
            "test case finished"
        );
        results.push(result);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::harness::Harness;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn test_argument_spreading() {
        let case = TestCase::calling("spread", "f", json!([1, 2]), json!(3));
        assert_eq!(case.arguments(), vec![Value::Number(1.0), Value::Number(2.0)]);

        let single = TestCase::calling("single", "f", json!(5), json!(5));
        assert_eq!(single.arguments(), vec![Value::Number(5.0)]);

        let none = TestCase::reading("none", "x", json!(1));
        assert!(none.arguments().is_empty());
    }

    #[test]
    fn test_target_serialization() {
        let case: TestCase = serde_json::from_value(json!({
            "description": "reads",
            "expected": "9876",
            "target": { "kind": "variable", "name": "securityCode" }
        }))
        .unwrap();
        assert_eq!(
            case.target,
            Some(TestTarget::Variable("securityCode".to_string()))
        );
        assert!(case.input.is_none());
    }

    #[tokio::test]
    async fn test_function_cases() {
        let harness = Harness::in_process(SandboxConfig::default());
        let mut slot = harness.begin().unwrap();
        let code = "function routePower(g1, g2, g3) { return (g1 && g2) || g3; }";
        let cases = vec![
            TestCase::calling("on", "routePower", json!([true, true, false]), json!(true)),
            TestCase::calling("off", "routePower", json!([true, false, false]), json!(false)),
        ];
        let results = run_test_cases(&mut slot, code, &cases, &Sandbox::new(), TIMEOUT).await;
        assert!(results.iter().all(|r| r.passed), "{:?}", results);
    }

    #[tokio::test]
    async fn test_missing_function_fails_case() {
        let harness = Harness::in_process(SandboxConfig::default());
        let mut slot = harness.begin().unwrap();
        let cases = vec![TestCase::calling("missing", "nope", json!([]), json!(1))];
        let results = run_test_cases(&mut slot, "let a = 1;", &cases, &Sandbox::new(), TIMEOUT).await;
        assert!(!results[0].passed);
        assert!(results[0].error.as_deref().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_thrown_error_fails_case() {
        let harness = Harness::in_process(SandboxConfig::default());
        let mut slot = harness.begin().unwrap();
        let code = "function f() { throw new Error('bad input'); }";
        let cases = vec![TestCase::calling("throws", "f", json!(1), json!(1))];
        let results = run_test_cases(&mut slot, code, &cases, &Sandbox::new(), TIMEOUT).await;
        assert!(!results[0].passed);
        assert_eq!(results[0].error.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn test_legacy_entry_point_and_result_slot() {
        let harness = Harness::in_process(SandboxConfig::default());
        let mut slot = harness.begin().unwrap();
        let code = "function twice(x) { return x * 2; }\n__challengeResult = twice(21);";
        let cases = vec![
            TestCase {
                description: "heuristic".to_string(),
                input: Some(Value::Number(4.0)),
                expected: Value::Number(8.0),
                target: None,
            },
            TestCase {
                description: "result slot".to_string(),
                input: None,
                expected: Value::Number(42.0),
                target: None,
            },
        ];
        let results = run_test_cases(&mut slot, code, &cases, &Sandbox::new(), TIMEOUT).await;
        assert!(results[0].passed, "{:?}", results[0]);
        assert!(results[1].passed, "{:?}", results[1]);
    }

    #[tokio::test]
    async fn test_cases_do_not_share_state() {
        let harness = Harness::in_process(SandboxConfig::default());
        let mut slot = harness.begin().unwrap();
        let mut base = Sandbox::new();
        base.bind("counter", json!(0)).unwrap();
        let code = "counter = counter + 1;\n__challengeResult = counter;";
        let cases = vec![
            TestCase {
                description: "first".to_string(),
                input: None,
                expected: json!(1).into(),
                target: None,
            },
            TestCase {
                description: "second".to_string(),
                input: None,
                expected: json!(1).into(),
                target: None,
            },
        ];
        let first = run_test_cases(&mut slot, code, &cases, &base, TIMEOUT).await;
        let second = run_test_cases(&mut slot, code, &cases, &base, TIMEOUT).await;
        assert!(first.iter().all(|r| r.passed));
        assert_eq!(first, second);
    }
}
