//! Execution harness: wraps sanitized player code into a self-contained
//! script, runs it through a [`ScriptEngine`] and decodes what came back.
//!
//! The script is two functions. The player function holds the player code
//! and takes the sandbox bindings as positional parameters, in a fixed
//! order: injected globals, then context keys sorted by name, then the
//! result slot. It also declares a hoisted observer that reads the observed
//! bindings, the optional lookup and the result slot from inside the player
//! scope. The runtime function calls the player function, then the observer,
//! and serializes the envelope as tagged JSON (see [`crate::value`]).
//!
//! The player function is defined outside the runtime closure, so player
//! code cannot reach the console buffer or the capture helpers, and an early
//! `return` only ends the player function.

use crate::analyzer::is_valid_identifier;
use crate::boa::BoaEngine;
use crate::config::SandboxConfig;
use crate::engine::{EngineCapabilities, ExecutionOptions, RunTicket, ScriptEngine};
use crate::errors::{Result, SandboxError};
use crate::process::ProcessEngine;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::debug;

/// Name of the binding player code may assign its answer to.
pub const RESULT_SLOT: &str = "__challengeResult";

/// Globals injected ahead of the challenge context, in parameter order.
pub const INJECTED_GLOBALS: &[&str] = &["console", "setTimeout", "setInterval", "fetch"];

const INTERNAL_PREFIX: &str = "__cq_";

/// Opening of the runtime closure. Built-ins are taken before player code
/// can replace them.
const RUNTIME_HEAD: &str = r#"(function (__cq_player) {
'use strict';
var stringify = JSON.stringify, keys = Object.keys, create = Object.create;
var isArray = Array.isArray, toText = String, finite = isFinite, Failure = Error;
var lines = [];
function fmt(v) {
  if (v === undefined) return 'undefined';
  if (v === null) return 'null';
  if (typeof v === 'object') {
    try { return stringify(v); } catch (e) { return '[Object]'; }
  }
  try { return toText(v); } catch (e) { return '[Value]'; }
}
function shim(level) {
  return function () {
    var message = '';
    for (var i = 0; i < arguments.length; i++) message += (i > 0 ? ' ' : '') + fmt(arguments[i]);
    lines[lines.length] = { level: level, message: message };
  };
}
function blocked(name) {
  return function () { throw new Failure(name + ' is not available in the sandbox'); };
}
function capture(value, depth, ancestors) {
  if (value === undefined) return { $t: 'undefined' };
  if (value === null) return null;
  var type = typeof value;
  if (type === 'boolean' || type === 'string') return value;
  if (type === 'number') return finite(value) ? value : { $t: 'number', repr: toText(value) };
  if (type === 'function') return { $t: 'function', name: toText(value.name || 'anonymous') };
  if (type === 'symbol') return { $t: 'opaque', repr: toText(value) };
  if (type === 'bigint') return { $t: 'opaque', repr: toText(value) + 'n' };
  for (var a = 0; a < ancestors.length; a++) {
    if (ancestors[a] === value) return { $t: 'opaque', repr: '[Circular]' };
  }
  if (depth <= 0) return { $t: 'opaque', repr: '[MaxDepth]' };
  ancestors[ancestors.length] = value;
  var out;
  if (isArray(value)) {
    var items = [];
    for (var i = 0; i < value.length; i++) items[i] = capture(value[i], depth - 1, ancestors);
    out = { $t: 'array', items: items };
  } else {
    var entries = create(null);
    var names = keys(value);
    for (var k = 0; k < names.length; k++) {
      entries[names[k]] = capture(value[names[k]], depth - 1, ancestors);
    }
    out = { $t: 'object', entries: entries };
  }
  ancestors.length--;
  return out;
}
function failure(err) {
  var name = 'Error';
  var message = 'Uncaught exception';
  try {
    if (err !== null && typeof err === 'object') {
      if (err.name !== undefined) name = toText(err.name);
      message = err.message !== undefined ? toText(err.message) : fmt(err);
    } else {
      message = fmt(err);
    }
  } catch (e) {}
  return { ok: false, error: { name: name, message: message } };
}
var envelope;
try {
var hook = create(null);
"#;

/// A value injected into the sandbox under a context name.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Plain data, rendered as a literal.
    Value(Value),
    /// A trusted JavaScript expression supplied by the challenge author,
    /// for helper functions and objects.
    Expression(String),
}

impl Binding {
    fn argument(&self) -> String {
        match self {
            Binding::Value(value) => js_literal(value),
            Binding::Expression(expr) => format!("({})", expr),
        }
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

impl From<serde_json::Value> for Binding {
    fn from(json: serde_json::Value) -> Self {
        Binding::Value(Value::from(json))
    }
}

/// The bindings player code runs against. Assembled fresh for every attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sandbox {
    context: BTreeMap<String, Binding>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context<I>(context: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Binding)>,
    {
        let mut sandbox = Self::new();
        for (name, binding) in context {
            sandbox.bind(name, binding)?;
        }
        Ok(sandbox)
    }

    /// Add a context binding. Names must be identifiers and may not shadow
    /// the injected globals or the result slot.
    pub fn bind(&mut self, name: impl Into<String>, binding: impl Into<Binding>) -> Result<()> {
        let name = name.into();
        check_context_name(&name)?;
        self.context.insert(name, binding.into());
        Ok(())
    }

    pub fn context(&self) -> &BTreeMap<String, Binding> {
        &self.context
    }

    /// Parameter names in binding order.
    pub fn parameter_names(&self) -> Vec<&str> {
        INJECTED_GLOBALS
            .iter()
            .copied()
            .chain(self.context.keys().map(String::as_str))
            .chain(std::iter::once(RESULT_SLOT))
            .collect()
    }

    fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "{ log: shim('log'), info: shim('info'), warn: shim('warn'), error: shim('error') }".to_string(),
            "blocked('setTimeout')".to_string(),
            "blocked('setInterval')".to_string(),
            "blocked('fetch')".to_string(),
        ];
        args.extend(self.context.values().map(Binding::argument));
        // The result slot starts out empty on every run.
        args.push("undefined".to_string());
        args
    }
}

pub(crate) fn check_context_name(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        return Err(SandboxError::InvalidChallenge(format!(
            "context name {:?} is not a valid identifier",
            name
        )));
    }
    if INJECTED_GLOBALS.contains(&name) || name == RESULT_SLOT || name.starts_with(INTERNAL_PREFIX)
    {
        return Err(SandboxError::InvalidChallenge(format!(
            "context name {:?} collides with a reserved sandbox binding",
            name
        )));
    }
    Ok(())
}

fn check_identifier(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SandboxError::InvalidChallenge(format!(
            "{:?} is not a valid identifier",
            name
        )))
    }
}

/// Render a value as a JavaScript expression.
pub fn js_literal(value: &Value) -> String {
    match value {
        Value::Undefined | Value::Function { .. } => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if n.is_nan() => "NaN".to_string(),
        Value::Number(n) if n.is_infinite() => {
            let repr = if *n > 0.0 { "Infinity" } else { "-Infinity" };
            repr.to_string()
        }
        Value::Number(n) => {
            let literal = value.to_string();
            if *n < 0.0 {
                format!("({})", literal)
            } else {
                literal
            }
        }
        Value::String(s) | Value::Opaque(s) => string_literal(s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(js_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", string_literal(k), js_literal(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn string_literal(s: &str) -> String {
    // JSON string escaping is valid JavaScript once the line separators are escaped too.
    serde_json::Value::String(s.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Something evaluated after the player code, inside the same scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Call the named function with these arguments.
    Call { function: String, args: Vec<Value> },
    /// Read a binding by name.
    Read(String),
}

impl Lookup {
    /// Expression evaluated in the player scope. Yields `{ value }` or
    /// `{ missing }`.
    fn expression(&self) -> Result<String> {
        match self {
            Lookup::Call { function, args } => {
                check_identifier(function)?;
                let args = args.iter().map(js_literal).collect::<Vec<_>>().join(", ");
                Ok(format!(
                    "(typeof {f} !== 'function' ? {{ missing: {msg} }} : {{ value: {f}({args}) }})",
                    f = function,
                    msg = string_literal(&format!("{} is not defined as a function", function)),
                    args = args,
                ))
            }
            Lookup::Read(name) => {
                check_identifier(name)?;
                Ok(format!(
                    "(function () {{ try {{ return {{ value: {} }}; }} catch (__cq_e) {{ return {{ value: undefined }}; }} }})()",
                    name
                ))
            }
        }
    }
}

/// What a lookup produced.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Value(Value),
    /// The called function does not exist.
    Missing(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
}

/// One console call made by player code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsoleLine {
    pub level: ConsoleLevel,
    pub message: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Value of the result slot after the run
    pub result: Value,
    /// Observed top-level bindings
    pub bindings: BTreeMap<String, Value>,
    pub lookup: Option<LookupOutcome>,
    pub console: Vec<ConsoleLine>,
    pub execution_time: Duration,
}

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    bindings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    lookup: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<Thrown>,
    #[serde(default)]
    console: Vec<ConsoleLine>,
}

#[derive(Deserialize)]
struct Thrown {
    name: String,
    message: String,
}

/// Build the complete script for one run.
pub fn build_script(
    sanitized: &str,
    sandbox: &Sandbox,
    observed: &[String],
    lookup: Option<&Lookup>,
    capture_depth: usize,
) -> Result<String> {
    for name in observed {
        check_identifier(name)?;
    }
    let lookup = match lookup {
        Some(lookup) => lookup.expression()?,
        None => "undefined".to_string(),
    };

    let mut script = String::with_capacity(RUNTIME_HEAD.len() + sanitized.len() + 1024);
    script.push_str(RUNTIME_HEAD);
    let _ = writeln!(script, "__cq_player({}, hook);", sandbox.arguments().join(", "));
    script.push_str("var snapshot = hook.observe();\nvar bindings = create(null);\n");
    script.push_str("var seen = keys(snapshot.bindings);\n");
    let _ = writeln!(
        script,
        "for (var n = 0; n < seen.length; n++) bindings[seen[n]] = capture(snapshot.bindings[seen[n]], {}, []);",
        capture_depth
    );
    script.push_str("var lookup;\nif (snapshot.lookup !== undefined) {\n");
    let _ = writeln!(
        script,
        "  lookup = snapshot.lookup.missing !== undefined ? {{ missing: toText(snapshot.lookup.missing) }} : {{ value: capture(snapshot.lookup.value, {}, []) }};",
        capture_depth
    );
    script.push_str("}\n");
    let _ = writeln!(
        script,
        "envelope = {{ ok: true, bindings: bindings, lookup: lookup, result: capture(snapshot.result, {}, []) }};",
        capture_depth
    );
    script.push_str("} catch (err) {\nenvelope = failure(err);\n}\n");
    script.push_str("envelope.console = lines;\nreturn stringify(envelope);\n");

    // The player function, passed in as the runtime's only argument.
    let _ = writeln!(
        script,
        "}})(function ({}, __cq_hook) {{",
        sandbox.parameter_names().join(", ")
    );
    script.push_str("'use strict';\nfunction __cq_observe() {\nvar __cq_seen = {};\n");
    for name in observed {
        let key = string_literal(name);
        let _ = writeln!(
            script,
            "__cq_seen[{k}] = undefined; try {{ __cq_seen[{k}] = {n}; }} catch (__cq_e) {{}}",
            k = key,
            n = name
        );
    }
    let _ = writeln!(
        script,
        "return {{ bindings: __cq_seen, lookup: {}, result: {} }};",
        lookup, RESULT_SLOT
    );
    script.push_str("}\n__cq_hook.observe = __cq_observe;\n");
    script.push_str(sanitized);
    script.push_str("\n});\n");
    Ok(script)
}

/// One editor instance's execution lane.
pub struct Harness {
    engine: Arc<dyn ScriptEngine>,
    slot: Arc<Semaphore>,
    config: SandboxConfig,
}

impl Harness {
    /// Runs go to a `codequest-js-runner` child process, which is killed when
    /// a run overstays its time limit.
    pub fn new(config: SandboxConfig) -> Self {
        let engine = Arc::new(ProcessEngine::new(
            config.runner_path.clone(),
            config.limits.clone(),
        ));
        Self::with_engine(engine, config)
    }

    /// Runs on an interpreter thread inside this process. A run that times
    /// out cannot be stopped and keeps the slot until it finishes on its own,
    /// so this is for trusted code and tests.
    pub fn in_process(config: SandboxConfig) -> Self {
        let engine = Arc::new(BoaEngine::new(config.limits.clone()));
        Self::with_engine(engine, config)
    }

    pub fn with_engine(engine: Arc<dyn ScriptEngine>, config: SandboxConfig) -> Self {
        Self {
            engine,
            slot: Arc::new(Semaphore::new(1)),
            config,
        }
    }

    /// Claim the execution slot. Fails with `Busy` while another run still
    /// holds it.
    pub fn begin(&self) -> Result<ExecutionSlot> {
        let permit = self
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| SandboxError::Busy)?;
        Ok(ExecutionSlot {
            engine: self.engine.clone(),
            ticket: RunTicket::new(permit),
            limits: self.config.limits.clone(),
            capture_depth: self.config.capture_depth,
            console: Vec::new(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

/// Exclusive right to run code on a harness. Runs are sequential.
pub struct ExecutionSlot {
    engine: Arc<dyn ScriptEngine>,
    ticket: RunTicket,
    limits: crate::config::ResourceLimits,
    capture_depth: usize,
    console: Vec<ConsoleLine>,
}

impl ExecutionSlot {
    pub async fn execute(
        &mut self,
        sanitized: &str,
        sandbox: &Sandbox,
        observed: &[String],
        lookup: Option<&Lookup>,
        timeout: Duration,
    ) -> Result<Execution> {
        self.console.clear();
        let script = build_script(sanitized, sandbox, observed, lookup, self.capture_depth)?;
        let options = ExecutionOptions {
            timeout,
            limits: self.limits.clone(),
        };

        let started = Instant::now();
        let raw = self
            .engine
            .evaluate(script, &options, self.ticket.clone())
            .await?;
        let execution_time = started.elapsed();
        if execution_time > timeout {
            return Err(SandboxError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let envelope: Envelope = serde_json::from_str(&raw)
            .map_err(|e| SandboxError::Capture(format!("malformed envelope: {}", e)))?;
        self.console = envelope.console;

        if !envelope.ok {
            let thrown = envelope.error.ok_or_else(|| {
                SandboxError::Capture("failed run without an error".to_string())
            })?;
            debug!(name = %thrown.name, message = %thrown.message, "player code threw");
            return Err(SandboxError::Runtime(thrown.message));
        }

        let mut bindings = BTreeMap::new();
        for (name, raw) in envelope.bindings {
            bindings.insert(name, Value::from_tagged(raw)?);
        }
        let lookup = envelope.lookup.map(decode_lookup).transpose()?;
        let result = match envelope.result {
            Some(raw) => Value::from_tagged(raw)?,
            None => Value::Undefined,
        };

        Ok(Execution {
            result,
            bindings,
            lookup,
            console: self.console.clone(),
            execution_time,
        })
    }

    /// Console output of the most recent run, including runs that threw.
    pub fn take_console(&mut self) -> Vec<ConsoleLine> {
        std::mem::take(&mut self.console)
    }
}

fn decode_lookup(raw: serde_json::Value) -> Result<LookupOutcome> {
    match raw {
        serde_json::Value::Object(mut map) => {
            if let Some(serde_json::Value::String(message)) = map.remove("missing") {
                return Ok(LookupOutcome::Missing(message));
            }
            match map.remove("value") {
                Some(value) => Ok(LookupOutcome::Value(Value::from_tagged(value)?)),
                None => Err(SandboxError::Capture("lookup without a value".to_string())),
            }
        }
        _ => Err(SandboxError::Capture("malformed lookup".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn harness() -> Harness {
        Harness::in_process(SandboxConfig::default())
    }

    fn observed(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parameter_order() {
        let mut sandbox = Sandbox::new();
        sandbox.bind("zeta", json!(1)).unwrap();
        sandbox.bind("alpha", json!("a")).unwrap();
        assert_eq!(
            sandbox.parameter_names(),
            vec!["console", "setTimeout", "setInterval", "fetch", "alpha", "zeta", RESULT_SLOT]
        );
    }

    #[test]
    fn test_rejects_colliding_names() {
        let mut sandbox = Sandbox::new();
        assert!(sandbox.bind("console", json!(1)).is_err());
        assert!(sandbox.bind(RESULT_SLOT, json!(1)).is_err());
        assert!(sandbox.bind("__cq_console", json!(1)).is_err());
        assert!(sandbox.bind("not valid", json!(1)).is_err());
    }

    #[test]
    fn test_js_literals() {
        assert_eq!(js_literal(&Value::from(json!([1, "a", null]))), "[1, \"a\", null]");
        assert_eq!(js_literal(&Value::Number(-2.0)), "(-2)");
        assert_eq!(js_literal(&Value::Number(f64::NAN)), "NaN");
        assert_eq!(js_literal(&Value::Undefined), "undefined");
        assert_eq!(js_literal(&Value::from(json!({"a b": true}))), "{\"a b\": true}");
    }

    #[test]
    fn test_lookup_names_validated() {
        let lookup = Lookup::Read("x; alert(1)".to_string());
        assert!(build_script("", &Sandbox::new(), &[], Some(&lookup), 8).is_err());
        assert!(build_script("", &Sandbox::new(), &observed(&["a.b"]), None, 8).is_err());
    }

    #[tokio::test]
    async fn test_captures_observed_bindings() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let run = slot
            .execute(
                "const securityCode = \"9876\";\nlet unused;",
                &Sandbox::new(),
                &observed(&["securityCode", "missing"]),
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(run.bindings["securityCode"], Value::from("9876"));
        assert!(run.bindings["missing"].is_undefined());
        assert!(run.result.is_undefined());
        assert!(run.execution_time <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_context_and_result_slot() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let mut sandbox = Sandbox::new();
        sandbox.bind("base", json!(40)).unwrap();
        sandbox
            .bind("double", Binding::Expression("function (x) { return x * 2; }".to_string()))
            .unwrap();
        let run = slot
            .execute(
                "__challengeResult = double(base) + 2;",
                &sandbox,
                &[],
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(run.result, Value::Number(82.0));
    }

    #[tokio::test]
    async fn test_console_collected() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let run = slot
            .execute(
                "console.log('hi', 1, undefined, null, {a: 1}); console.warn('careful');",
                &Sandbox::new(),
                &[],
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(
            run.console,
            vec![
                ConsoleLine {
                    level: ConsoleLevel::Log,
                    message: "hi 1 undefined null {\"a\":1}".to_string()
                },
                ConsoleLine {
                    level: ConsoleLevel::Warn,
                    message: "careful".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_thrown_error_keeps_console() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let err = slot
            .execute(
                "console.log('before'); throw new Error('boom');",
                &Sandbox::new(),
                &[],
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(ref m) if m == "boom"));
        let console = slot.take_console();
        assert_eq!(console.len(), 1);
        assert_eq!(console[0].message, "before");
    }

    #[tokio::test]
    async fn test_stubbed_globals_throw() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let err = slot
            .execute(
                "const later = setTimeout; later(() => {}, 10);",
                &Sandbox::new(),
                &[],
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "setTimeout is not available in the sandbox");
    }

    #[tokio::test]
    async fn test_lookup_call_and_missing() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let code = "function add(a, b) { return a + b; }";
        let call = Lookup::Call {
            function: "add".to_string(),
            args: vec![Value::Number(2.0), Value::Number(3.0)],
        };
        let run = slot
            .execute(code, &Sandbox::new(), &[], Some(&call), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(run.lookup, Some(LookupOutcome::Value(Value::Number(5.0))));

        let missing = Lookup::Call {
            function: "subtract".to_string(),
            args: vec![],
        };
        let run = slot
            .execute(code, &Sandbox::new(), &[], Some(&missing), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(run.lookup, Some(LookupOutcome::Missing(_))));
    }

    #[tokio::test]
    async fn test_cycles_become_opaque() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let run = slot
            .execute(
                "const node = { name: 'a' }; node.self = node;",
                &Sandbox::new(),
                &observed(&["node"]),
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        let Value::Object(map) = &run.bindings["node"] else {
            panic!("expected object");
        };
        assert_eq!(map["self"], Value::Opaque("[Circular]".to_string()));
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let err = slot
            .execute(
                "const = 5;",
                &Sandbox::new(),
                &[],
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Syntax(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_top_level_return_still_reports() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let run = slot
            .execute(
                "console.log('early');\nreturn 42;",
                &Sandbox::new(),
                &observed(&["later"]),
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(run.result.is_undefined());
        assert_eq!(run.console.len(), 1);

        // `later` is still in its temporal dead zone when the code returns.
        let run = slot
            .execute(
                "function add(a, b) { return a + b; }\nreturn;\nlet later = 1;",
                &Sandbox::new(),
                &observed(&["later"]),
                Some(&Lookup::Call {
                    function: "add".to_string(),
                    args: vec![Value::Number(1.0), Value::Number(2.0)],
                }),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(run.bindings["later"].is_undefined());
        assert_eq!(run.lookup, Some(LookupOutcome::Value(Value::Number(3.0))));
    }

    #[tokio::test]
    async fn test_replaced_builtins_do_not_break_envelope() {
        let harness = harness();
        let mut slot = harness.begin().unwrap();
        let run = slot
            .execute(
                "JSON.stringify = function () { return 42; };\nArray.prototype.push = null;\nconsole.log('still here');\nconst kept = [1, 2];",
                &Sandbox::new(),
                &observed(&["kept"]),
                None,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(run.bindings["kept"], Value::from(json!([1, 2])));
        assert_eq!(run.console[0].message, "still here");
    }

    #[test]
    fn test_runtime_is_outside_player_scope() {
        let script = build_script("let x = 1;", &Sandbox::new(), &[], None, 8).unwrap();
        let player = script.find("})(function (").unwrap();
        assert!(script[..player].contains("var lines = [];"));
        assert!(!script[player..].contains("lines"));
        assert!(script.trim_end().ends_with("let x = 1;\n});"));
    }

    #[tokio::test]
    async fn test_second_begin_is_busy() {
        let harness = harness();
        let slot = harness.begin().unwrap();
        assert!(harness.is_busy());
        assert!(matches!(harness.begin(), Err(SandboxError::Busy)));
        drop(slot);
        assert!(harness.begin().is_ok());
    }
}
