use crate::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wall-clock limit for a single run, in milliseconds.
pub const DEFAULT_TIME_LIMIT_MS: u64 = 2000;
/// Default (informational) memory limit per challenge: 5 MiB.
pub const DEFAULT_MEMORY_LIMIT: u64 = 5 * 1024 * 1024;
/// Default maximum accepted source size: 64 KiB.
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Security profile for player code execution.
/// Determines how much work a single run may do inside the interpreter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    /// Generous limits for authoring and debugging challenges
    Relaxed,

    /// Limits suited to beginner exercises
    #[default]
    Standard,

    /// Tight limits for untrusted or shared editors
    Strict,
}

impl SecurityProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relaxed" => Some(Self::Relaxed),
            "standard" => Some(Self::Standard),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    /// Get resource limits for this profile
    pub fn resource_limits(&self) -> ResourceLimits {
        match self {
            SecurityProfile::Relaxed => ResourceLimits {
                loop_iteration_limit: 50_000_000,
                recursion_limit: 1024,
                stack_size_limit: 1024 * 1024,
                thread_stack_bytes: 16 * 1024 * 1024,
            },
            SecurityProfile::Standard => ResourceLimits::default(),
            SecurityProfile::Strict => ResourceLimits {
                loop_iteration_limit: 100_000,
                recursion_limit: 128,
                stack_size_limit: 64 * 1024,
                thread_stack_bytes: 4 * 1024 * 1024,
            },
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SecurityProfile::Relaxed => "Generous loop and recursion limits",
            SecurityProfile::Standard => "Loop and recursion limits sized for exercises",
            SecurityProfile::Strict => "Tight loop and recursion limits",
        }
    }
}

/// Interpreter limits applied to every run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum iterations of any single loop before the interpreter aborts
    pub loop_iteration_limit: u64,
    /// Maximum call depth
    pub recursion_limit: usize,
    /// Maximum interpreter value-stack size
    pub stack_size_limit: usize,
    /// Native stack size of the interpreter thread
    pub thread_stack_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 5_000_000,
            recursion_limit: 400,
            stack_size_limit: 512 * 1024,
            thread_stack_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Top-level sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Profile the limits were derived from
    pub profile: SecurityProfile,
    /// Execution time limit used when a challenge does not declare one
    pub default_time_limit_ms: u64,
    /// Memory limit used when a challenge does not declare one
    pub default_memory_limit: u64,
    /// Maximum accepted source size in bytes
    pub max_code_size: usize,
    /// Maximum nesting depth when capturing values out of the interpreter
    pub capture_depth: usize,
    /// Interpreter limits
    pub limits: ResourceLimits,
    /// Path of the `codequest-js-runner` binary. Looked up next to the
    /// current executable and on `PATH` when unset.
    pub runner_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::for_profile(SecurityProfile::default())
    }
}

impl SandboxConfig {
    pub fn for_profile(profile: SecurityProfile) -> Self {
        Self {
            profile,
            default_time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            default_memory_limit: DEFAULT_MEMORY_LIMIT,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            capture_depth: 32,
            limits: profile.resource_limits(),
            runner_path: None,
        }
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SandboxConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CODEQUEST_*` environment overrides on top of this configuration.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("CODEQUEST_PROFILE") {
            let profile = SecurityProfile::parse(&raw).ok_or_else(|| {
                SandboxError::InvalidConfig(format!("unknown profile: {}", raw))
            })?;
            self.profile = profile;
            self.limits = profile.resource_limits();
        }
        if let Some(raw) = lookup("CODEQUEST_TIME_LIMIT_MS") {
            self.default_time_limit_ms = raw.trim().parse().map_err(|_| {
                SandboxError::InvalidConfig(format!("CODEQUEST_TIME_LIMIT_MS: {}", raw))
            })?;
        }
        if let Some(raw) = lookup("CODEQUEST_LOOP_LIMIT") {
            self.limits.loop_iteration_limit = raw.trim().parse().map_err(|_| {
                SandboxError::InvalidConfig(format!("CODEQUEST_LOOP_LIMIT: {}", raw))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_time_limit_ms == 0 {
            return Err(SandboxError::InvalidConfig(
                "default_time_limit_ms must be positive".to_string(),
            ));
        }
        if self.limits.loop_iteration_limit == 0 || self.limits.recursion_limit == 0 {
            return Err(SandboxError::InvalidConfig(
                "interpreter limits must be positive".to_string(),
            ));
        }
        if self.capture_depth == 0 {
            return Err(SandboxError::InvalidConfig(
                "capture_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_time_limit(&self) -> Duration {
        Duration::from_millis(self.default_time_limit_ms)
    }
}
