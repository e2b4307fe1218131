//! Challenge definitions and the registry that normalizes them.

use crate::analyzer::is_valid_identifier;
use crate::config::{SandboxConfig, DEFAULT_MEMORY_LIMIT, DEFAULT_TIME_LIMIT_MS};
use crate::errors::{Result, SandboxError};
use crate::harness::{check_context_name, Binding, Sandbox};
use crate::runner::{TestCase, TestResult, TestTarget};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TITLE: &str = "Untitled Challenge";
pub const DEFAULT_DESCRIPTION: &str = "No description provided.";
pub const DEFAULT_INITIAL_CODE: &str = "// Write your code here\n";
pub const DEFAULT_SKILL_TYPE: &str = "variables";
pub const DEFAULT_CATEGORY: &str = "general";

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            "expert" => Some(Self::Expert),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict shown to the player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validation {
    pub success: bool,
    pub message: String,
}

impl Validation {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Verdict for challenges without a validator.
    pub fn from_test_results(results: &[TestResult]) -> Self {
        let failed = results.iter().filter(|r| !r.passed).count();
        if results.is_empty() {
            Self::success("Code executed successfully.")
        } else if failed == 0 {
            Self::success(format!("All {} tests passed!", results.len()))
        } else {
            Self::failure(format!("{} of {} tests failed.", failed, results.len()))
        }
    }
}

/// Post-run state handed to a validator.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    /// Value of the result slot
    pub result: &'a Value,
    /// The challenge's observed bindings
    pub bindings: &'a BTreeMap<String, Value>,
    pub test_results: &'a [TestResult],
}

impl<'a> ValidationInput<'a> {
    /// An observed binding, `undefined` when it was never declared.
    pub fn binding(&self, name: &str) -> &'a Value {
        const UNDEFINED: &Value = &Value::Undefined;
        self.bindings.get(name).unwrap_or(UNDEFINED)
    }

    pub fn all_tests_passed(&self) -> bool {
        self.test_results.iter().all(|r| r.passed)
    }
}

pub type Validator = Arc<dyn Fn(&ValidationInput<'_>) -> Validation + Send + Sync>;

/// A challenge as authored. Every field is optional; the registry fills in
/// defaults.
#[derive(Clone, Default)]
pub struct ChallengeDefinition {
    pub title: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub initial_code: Option<String>,
    pub solution_code: Option<String>,
    pub hints: Option<Vec<String>>,
    pub validator: Option<Validator>,
    pub context: Option<BTreeMap<String, Binding>>,
    pub observed_bindings: Option<Vec<String>>,
    pub skill_type: Option<String>,
    pub category: Option<String>,
    pub test_cases: Option<Vec<TestCase>>,
    pub execution_time_limit: Option<Duration>,
    pub memory_limit: Option<u64>,
}

impl ChallengeDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn initial_code(mut self, code: impl Into<String>) -> Self {
        self.initial_code = Some(code.into());
        self
    }

    pub fn solution_code(mut self, code: impl Into<String>) -> Self {
        self.solution_code = Some(code.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.get_or_insert_with(Vec::new).push(hint.into());
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&ValidationInput<'_>) -> Validation + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn context(mut self, name: impl Into<String>, binding: impl Into<Binding>) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), binding.into());
        self
    }

    /// Capture this top-level binding after the run for the validator.
    pub fn observe(mut self, name: impl Into<String>) -> Self {
        self.observed_bindings
            .get_or_insert_with(Vec::new)
            .push(name.into());
        self
    }

    pub fn skill_type(mut self, skill: impl Into<String>) -> Self {
        self.skill_type = Some(skill.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn test_case(mut self, case: TestCase) -> Self {
        self.test_cases.get_or_insert_with(Vec::new).push(case);
        self
    }

    pub fn execution_time_limit(mut self, limit: Duration) -> Self {
        self.execution_time_limit = Some(limit);
        self
    }

    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }
}

/// A normalized, immutable challenge.
#[derive(Clone)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub initial_code: String,
    /// Reference solution; never executed by the pipeline
    pub solution_code: Option<String>,
    pub hints: Vec<String>,
    pub validator: Option<Validator>,
    pub context: BTreeMap<String, Binding>,
    pub observed_bindings: Vec<String>,
    pub skill_type: String,
    pub category: String,
    pub test_cases: Vec<TestCase>,
    pub execution_time_limit: Duration,
    /// Informational only
    pub memory_limit: u64,
}

impl Challenge {
    /// A fresh sandbox holding this challenge's context bindings.
    pub fn sandbox(&self) -> Result<Sandbox> {
        Sandbox::with_context(self.context.clone())
    }

    /// Turn back into a fully-populated definition.
    pub fn to_definition(&self) -> ChallengeDefinition {
        ChallengeDefinition {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            difficulty: Some(self.difficulty),
            initial_code: Some(self.initial_code.clone()),
            solution_code: self.solution_code.clone(),
            hints: Some(self.hints.clone()),
            validator: self.validator.clone(),
            context: Some(self.context.clone()),
            observed_bindings: Some(self.observed_bindings.clone()),
            skill_type: Some(self.skill_type.clone()),
            category: Some(self.category.clone()),
            test_cases: Some(self.test_cases.clone()),
            execution_time_limit: Some(self.execution_time_limit),
            memory_limit: Some(self.memory_limit),
        }
    }

    pub fn summary(&self) -> ChallengeSummary {
        ChallengeSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty,
            initial_code: self.initial_code.clone(),
            hints: self.hints.clone(),
            skill_type: self.skill_type.clone(),
            category: self.category.clone(),
            test_cases: self.test_cases.len(),
            execution_time_limit: self.execution_time_limit.as_millis() as u64,
            memory_limit: self.memory_limit,
        }
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Challenge")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("difficulty", &self.difficulty)
            .field("category", &self.category)
            .field("has_validator", &self.validator.is_some())
            .field("test_cases", &self.test_cases.len())
            .finish()
    }
}

impl PartialEq for Challenge {
    fn eq(&self, other: &Self) -> bool {
        let same_validator = match (&self.validator, &other.validator) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_validator
            && self.id == other.id
            && self.title == other.title
            && self.description == other.description
            && self.difficulty == other.difficulty
            && self.initial_code == other.initial_code
            && self.solution_code == other.solution_code
            && self.hints == other.hints
            && self.context == other.context
            && self.observed_bindings == other.observed_bindings
            && self.skill_type == other.skill_type
            && self.category == other.category
            && self.test_cases == other.test_cases
            && self.execution_time_limit == other.execution_time_limit
            && self.memory_limit == other.memory_limit
    }
}

/// What the editor needs to present a challenge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub initial_code: String,
    pub hints: Vec<String>,
    pub skill_type: String,
    pub category: String,
    pub test_cases: usize,
    pub execution_time_limit: u64,
    pub memory_limit: u64,
}

/// Catalogue of challenges keyed by id.
#[derive(Debug, Clone)]
pub struct ChallengeRegistry {
    challenges: BTreeMap<String, Arc<Challenge>>,
    default_time_limit: Duration,
    default_memory_limit: u64,
}

impl Default for ChallengeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeRegistry {
    pub fn new() -> Self {
        Self {
            challenges: BTreeMap::new(),
            default_time_limit: Duration::from_millis(DEFAULT_TIME_LIMIT_MS),
            default_memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// A registry whose defaults come from `config`.
    pub fn with_config(config: &SandboxConfig) -> Self {
        Self {
            challenges: BTreeMap::new(),
            default_time_limit: config.default_time_limit(),
            default_memory_limit: config.default_memory_limit,
        }
    }

    /// A registry pre-loaded with the built-in challenges.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Normalize and store a definition. Registering an existing id replaces
    /// it; handles to the old challenge stay valid.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        definition: ChallengeDefinition,
    ) -> Result<Arc<Challenge>> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SandboxError::InvalidChallenge(
                "challenge id must not be empty".to_string(),
            ));
        }

        let context = definition.context.unwrap_or_default();
        for name in context.keys() {
            check_context_name(name)?;
        }
        let observed_bindings = definition.observed_bindings.unwrap_or_default();
        for name in &observed_bindings {
            require_identifier(&id, name)?;
        }
        let test_cases = definition.test_cases.unwrap_or_default();
        for case in &test_cases {
            match &case.target {
                Some(TestTarget::Function(name)) | Some(TestTarget::Variable(name)) => {
                    require_identifier(&id, name)?
                }
                None => {}
            }
        }
        let execution_time_limit = definition
            .execution_time_limit
            .unwrap_or(self.default_time_limit);
        if execution_time_limit.is_zero() {
            return Err(SandboxError::InvalidChallenge(format!(
                "{}: execution time limit must be positive",
                id
            )));
        }

        let challenge = Arc::new(Challenge {
            id: id.clone(),
            title: definition.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: definition
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            difficulty: definition.difficulty.unwrap_or_default(),
            initial_code: definition
                .initial_code
                .unwrap_or_else(|| DEFAULT_INITIAL_CODE.to_string()),
            solution_code: definition.solution_code,
            hints: definition.hints.unwrap_or_default(),
            validator: definition.validator,
            context,
            observed_bindings,
            skill_type: definition
                .skill_type
                .unwrap_or_else(|| DEFAULT_SKILL_TYPE.to_string()),
            category: definition
                .category
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            test_cases,
            execution_time_limit,
            memory_limit: definition.memory_limit.unwrap_or(self.default_memory_limit),
        });

        if self
            .challenges
            .insert(id.clone(), challenge.clone())
            .is_some()
        {
            debug!(challenge = %id, "replaced existing challenge");
        }
        Ok(challenge)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Challenge>> {
        self.challenges.get(id).cloned()
    }

    pub fn list_by_category(&self, category: &str) -> Vec<Arc<Challenge>> {
        self.challenges
            .values()
            .filter(|c| c.category == category)
            .cloned()
            .collect()
    }

    pub fn list_by_difficulty(&self, difficulty: Difficulty) -> Vec<Arc<Challenge>> {
        self.challenges
            .values()
            .filter(|c| c.difficulty == difficulty)
            .cloned()
            .collect()
    }

    /// Every challenge, ordered by id.
    pub fn all(&self) -> Vec<Arc<Challenge>> {
        self.challenges.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

fn require_identifier(id: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SandboxError::InvalidChallenge(format!(
            "{}: {:?} is not a valid identifier",
            id, name
        )))
    }
}
