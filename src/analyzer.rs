//! Static analysis of player code before it reaches the interpreter.
//!
//! This is a best-effort denylist rewrite, not an isolation boundary: it can
//! be defeated by obfuscation such as bracket-notation property access. The
//! actual boundary is the interpreter realm, which has no host bindings. The
//! analyzer exists to give players early, readable feedback.

use crate::errors::{Result, SandboxError};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Constructs rewritten into placeholder comments by [`sanitize`].
const PRIMARY_RULES: &[(&str, &str)] = &[
    ("eval", r"\beval\s*\("),
    ("new Function", r"\bnew\s+Function\b"),
    ("document access", r"\bdocument\s*\."),
    ("window access", r"\bwindow\s*\."),
    ("localStorage", r"\blocalStorage\b"),
    ("sessionStorage", r"\bsessionStorage\b"),
    ("fetch", r"\bfetch\s*\("),
    ("XMLHttpRequest", r"\bXMLHttpRequest\b"),
    ("WebSocket", r"\bWebSocket\b"),
    ("process access", r"\bprocess\s*\."),
    ("require", r"\brequire\s*\("),
    ("import", r"\bimport\s+"),
    ("dynamic import", r"\bimport\s*\("),
    ("setInterval", r"\bsetInterval\s*\("),
    ("setTimeout", r"\bsetTimeout\s*\("),
    ("Worker", r"\bWorker\s*\("),
    ("Proxy", r"\bProxy\s*\("),
];

/// Tokens that must not survive sanitization, matched on word boundaries.
/// `__cq_` names belong to the execution harness.
const SECONDARY_PATTERN: &str =
    r"\b(child_process|process|require|fs|__dirname|__filename|document|window|__cq_\w*)\b";

const INFINITE_LOOP_PATTERN: &str = r"\bwhile\s*\(\s*true\s*\)\s*\{";
const INFINITE_LOOP_RULE: &str = "while(true) without break";

fn primary_rules() -> &'static [(&'static str, Regex)] {
    static RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        PRIMARY_RULES
            .iter()
            .map(|(name, pattern)| {
                (
                    *name,
                    Regex::new(pattern).expect("static denylist pattern is valid"),
                )
            })
            .collect()
    })
}

fn secondary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SECONDARY_PATTERN).expect("static denylist pattern is valid"))
}

fn infinite_loop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(INFINITE_LOOP_PATTERN).expect("static loop pattern is valid"))
}

fn function_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bfunction\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(")
            .expect("static declaration pattern is valid")
    })
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static identifier pattern is valid")
    })
}

/// A construct removed by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedConstruct {
    /// Name of the rule that fired
    pub rule: &'static str,
    /// The original matched text
    pub text: String,
    /// Byte offset of the match in the original source
    pub offset: usize,
}

/// Output of [`sanitize_detailed`].
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub code: String,
    pub blocked: Vec<BlockedConstruct>,
}

impl Sanitized {
    pub fn is_clean(&self) -> bool {
        self.blocked.is_empty()
    }
}

/// Rewrite denylisted constructs into inert placeholder comments. Never fails.
pub fn sanitize(source: &str) -> String {
    sanitize_detailed(source).code
}

/// Like [`sanitize`], also reporting which constructs were blocked.
pub fn sanitize_detailed(source: &str) -> Sanitized {
    // (start, end, rule, text carried into the placeholder)
    let mut matches: Vec<(usize, usize, &'static str, String)> = Vec::new();

    for (rule, re) in primary_rules() {
        for m in re.find_iter(source) {
            matches.push((m.start(), m.end(), rule, m.as_str().to_string()));
        }
    }

    for m in infinite_loop_regex().find_iter(source) {
        if source[m.end()..].trim_start().starts_with("break") {
            continue;
        }
        // m.end() - 1 is the opening brace of the loop body
        let end = matching_brace(source, m.end() - 1)
            .map(|close| close + 1)
            .unwrap_or(m.end());
        let head = m.as_str().to_string();
        let text = if end > m.end() {
            format!("{} ... }}", head)
        } else {
            head
        };
        matches.push((m.start(), end, INFINITE_LOOP_RULE, text));
    }

    // Leftmost first; on ties the longest match wins. Overlapped matches are
    // already covered by the earlier replacement.
    matches.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut code = String::with_capacity(source.len());
    let mut blocked = Vec::new();
    let mut cursor = 0;
    for (start, end, rule, text) in matches {
        if start < cursor {
            continue;
        }
        code.push_str(&source[cursor..start]);
        code.push_str(&placeholder(&text));
        cursor = end;
        blocked.push(BlockedConstruct {
            rule,
            text,
            offset: start,
        });
    }
    code.push_str(&source[cursor..]);

    for construct in &blocked {
        warn!(
            rule = construct.rule,
            offset = construct.offset,
            "blocked construct in player code"
        );
    }

    Sanitized { code, blocked }
}

fn placeholder(text: &str) -> String {
    format!("/* blocked: {} */", text.replace("*/", "* /").trim_end())
}

/// Byte index of the brace closing the one at `open`, skipping strings and comments.
fn matching_brace(source: &str, open: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            quote @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Re-scan sanitized code for tokens that must never reach the interpreter.
///
/// Placeholder comments are scanned too, so sanitized references to
/// `document`, `window`, `process` and friends still fail here.
pub fn assert_safe(sanitized: &str) -> Result<()> {
    match secondary_regex().find(sanitized) {
        Some(m) => Err(SandboxError::SecurityViolation {
            construct: m.as_str().to_string(),
        }),
        None => Ok(()),
    }
}

pub fn check_size(source: &str, max: usize) -> Result<()> {
    if source.len() > max {
        return Err(SandboxError::CodeTooLarge {
            max,
            actual: source.len(),
        });
    }
    Ok(())
}

/// The first `function <name>` declaration in the source.
///
/// Legacy heuristic for test cases that do not name their target; prefer an
/// explicit `TestTarget`.
pub fn detect_entry_point(source: &str) -> Option<String> {
    function_decl_regex()
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "let", "new", "null", "return", "static", "super", "switch",
    "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
    "arguments", "eval", "undefined",
];

/// Whether `name` can be used as a strict-mode parameter or binding name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_match(name) && !RESERVED_WORDS.contains(&name)
}
