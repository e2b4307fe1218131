use crate::runner::TestResult;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, warn};

/// Deepest structure the estimator will walk. Captured snapshots are bounded
/// by the capture depth, so hitting this means the snapshot is corrupt.
const MAX_WALK_DEPTH: usize = 256;

/// Metrics reported for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Wall-clock time of the main run in milliseconds
    pub execution_time: u64,
    /// Estimated size of the sandbox after the run, in bytes
    pub memory_usage: u64,
    pub error_count: u32,
    pub test_results: Vec<TestResult>,
}

/// Rough byte size of a post-run sandbox snapshot.
///
/// This is an estimate for display, not a measurement of interpreter memory.
/// Internal bindings (names starting with `__`) are skipped.
pub fn estimate_memory(snapshot: &BTreeMap<String, Value>) -> u64 {
    let mut total = 0u64;
    for (name, value) in snapshot {
        if name.starts_with("__") {
            continue;
        }
        match size_of_value(value, 0) {
            Some(size) => total += size,
            None => {
                error!(binding = %name, "memory estimate exceeded walk depth");
                return 0;
            }
        }
    }
    total
}

/// Log when a run's estimate is over the challenge's informational limit.
pub fn check_memory_limit(usage: u64, limit: u64) -> bool {
    if usage > limit {
        warn!(usage, limit, "estimated memory usage over challenge limit");
        return false;
    }
    true
}

fn string_size(s: &str) -> u64 {
    2 * s.encode_utf16().count() as u64
}

fn size_of_value(value: &Value, depth: usize) -> Option<u64> {
    if depth > MAX_WALK_DEPTH {
        return None;
    }
    let size = match value {
        Value::Undefined | Value::Null | Value::Function { .. } => 0,
        Value::Bool(_) => 4,
        Value::Number(_) => 8,
        Value::String(s) | Value::Opaque(s) => string_size(s),
        Value::Array(items) => {
            let mut sum = 0;
            for (index, item) in items.iter().enumerate() {
                sum += string_size(&index.to_string()) + size_of_value(item, depth + 1)?;
            }
            sum
        }
        Value::Object(map) => {
            let mut sum = 0;
            for (key, item) in map {
                sum += string_size(key) + size_of_value(item, depth + 1)?;
            }
            sum
        }
    };
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_primitive_sizes() {
        let snap = snapshot(&[
            ("name", Value::from("Agent X")),
            ("age", Value::Number(30.0)),
            ("ok", Value::Bool(true)),
            ("nothing", Value::Null),
            ("f", Value::Function { name: "f".into() }),
        ]);
        assert_eq!(estimate_memory(&snap), 14 + 8 + 4);
    }

    #[test]
    fn test_containers_count_keys() {
        let snap = snapshot(&[
            ("list", Value::from(json!([1, 2]))),
            ("obj", Value::from(json!({ "ab": true }))),
        ]);
        // "0" + 8, "1" + 8, then "ab" + 4
        assert_eq!(estimate_memory(&snap), (2 + 8) * 2 + (4 + 4));
    }

    #[test]
    fn test_internal_bindings_skipped() {
        let snap = snapshot(&[("__challengeResult", Value::from("ignored"))]);
        assert_eq!(estimate_memory(&snap), 0);
    }

    #[test]
    fn test_utf16_units() {
        let snap = snapshot(&[("s", Value::from("\u{1F600}"))]);
        assert_eq!(estimate_memory(&snap), 4);
    }

    #[test]
    fn test_pathological_depth_returns_zero() {
        let mut value = Value::Null;
        for _ in 0..(MAX_WALK_DEPTH + 2) {
            value = Value::Array(vec![value]);
        }
        assert_eq!(estimate_memory(&snapshot(&[("deep", value)])), 0);
    }

    #[test]
    fn test_limit_is_advisory() {
        assert!(check_memory_limit(10, 100));
        assert!(!check_memory_limit(200, 100));
    }

    #[test]
    fn test_metrics_serialize_camel_case() {
        let json = serde_json::to_value(RunMetrics {
            execution_time: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["executionTime"], 3);
        assert!(json.get("testResults").is_some());
    }
}
