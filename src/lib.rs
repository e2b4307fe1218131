//! Execution and validation pipeline for CodeQuest's in-game code editor.
//!
//! Player code goes through [`analyzer`] (denylist rewrite), runs inside a
//! fresh interpreter realm via [`harness`] (hosted in a `codequest-js-runner`
//! child process, see [`process`]), is checked by [`runner`] against
//! the challenge's test cases and finally judged by the challenge validator.
//! [`ChallengeSession`] ties the stages together for one editor instance.
//!
//! ```no_run
//! use codequest::{ChallengeRegistry, ChallengeSession, SandboxConfig};
//!
//! # async fn demo() -> codequest::Result<()> {
//! let session = ChallengeSession::new(ChallengeRegistry::with_builtins(), SandboxConfig::default());
//! let result = session
//!     .run_challenge("security-initialization", "let securityCode = \"9876\";")
//!     .await?;
//! assert!(result.solved());
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod boa;
pub mod builtin;
pub mod challenge;
pub mod config;
pub mod engine;
pub mod errors;
pub mod harness;
pub mod metrics;
pub mod process;
pub mod progress;
pub mod runner;
pub mod session;
pub mod value;

pub use boa::BoaEngine;
pub use challenge::{
    Challenge, ChallengeDefinition, ChallengeRegistry, ChallengeSummary, Difficulty, Validation,
    ValidationInput,
};
pub use config::{ResourceLimits, SandboxConfig, SecurityProfile};
pub use engine::{EngineCapabilities, ExecutionOptions, ScriptEngine};
pub use errors::{ErrorKind, Result, SandboxError};
pub use harness::{Binding, ConsoleLevel, ConsoleLine, Harness, Sandbox};
pub use metrics::RunMetrics;
pub use process::ProcessEngine;
pub use progress::{experience_award, Attempt, AttemptState};
pub use runner::{TestCase, TestResult, TestTarget};
pub use session::{ChallengeSession, ExecutionResult};
pub use value::Value;
