//! Configuration: YAML file for structured keys, environment variables for
//! secrets and quick overrides. Env vars win when both are present, mirroring
//! the teacher's `Config::load` precedence (env over file defaults).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ResearchError, Result};

/// Per-role model selection. Roles match the LLM call sites in the
/// pipeline: decomposition, hypothesis generation, per-source query
/// generation, relevance scoring/reformulation, entity/claim extraction,
/// and final synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleModelConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for RoleModelConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub default_model: String,
    pub query_generation: RoleModelConfig,
    pub refinement: RoleModelConfig,
    pub analysis: RoleModelConfig,
    pub synthesis: RoleModelConfig,
    pub extraction: RoleModelConfig,
    pub hypothesis: RoleModelConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: "grok-4-1-fast-reasoning".to_string(),
            query_generation: RoleModelConfig {
                max_tokens: 512,
                ..Default::default()
            },
            refinement: RoleModelConfig {
                max_tokens: 256,
                ..Default::default()
            },
            analysis: RoleModelConfig::default(),
            synthesis: RoleModelConfig {
                max_tokens: 4096,
                temperature: 0.4,
                ..Default::default()
            },
            extraction: RoleModelConfig {
                max_tokens: 2048,
                temperature: 0.1,
                ..Default::default()
            },
            hypothesis: RoleModelConfig {
                max_tokens: 1024,
                temperature: 0.6,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisMode {
    PlanningAid,
    Executed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisBranchingConfig {
    pub enabled: bool,
    pub mode: HypothesisMode,
}

impl Default for HypothesisBranchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: HypothesisMode::PlanningAid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub max_tasks: u32,
    pub max_retries_per_task: u32,
    pub min_results_per_task: usize,
    pub max_concurrent_tasks: usize,
    pub max_time_minutes: u64,
    pub max_cost_dollars: f64,
    pub hypothesis_branching: HypothesisBranchingConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_tasks: 5,
            max_retries_per_task: 2,
            min_results_per_task: 3,
            max_concurrent_tasks: 4,
            max_time_minutes: 15,
            max_cost_dollars: 5.0,
            hypothesis_branching: HypothesisBranchingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub credential_env: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credential_env: None,
        }
    }
}

/// Top-level configuration, the frozen snapshot written to
/// `run_config.json` at the start of every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    #[serde(default)]
    pub databases: HashMap<String, DatabaseSourceConfig>,
    /// Directory holding `*.txt` prompt templates. Defaults to
    /// `./templates` relative to the process working directory.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
    /// Root of the append-only run output tree, `spec.md` §6's
    /// `data/research_output/`.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Root of the API request log / cost ledger, `data/logs/` and the
    /// SQLite ledger file.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

fn default_templates_dir() -> String {
    "templates".to_string()
}

fn default_output_dir() -> String {
    "data/research_output".to_string()
}

fn default_logs_dir() -> String {
    "data/logs".to_string()
}

impl Config {
    /// Load from a YAML file at `path`, then apply environment variable
    /// overrides for the handful of keys `spec.md` calls out as
    /// env-overridable (model choices, budgets). Missing file is not an
    /// error — the defaults plus env overrides are still a valid config.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => serde_yaml::from_str(&contents)?,
            Err(_) => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("RESEARCH_LLM_DEFAULT_MODEL") {
            self.llm.default_model = model;
        }
        if let Ok(cost) = std::env::var("RESEARCH_MAX_COST_DOLLARS") {
            if let Ok(parsed) = cost.parse() {
                self.research.max_cost_dollars = parsed;
            }
        }
        if let Ok(minutes) = std::env::var("RESEARCH_MAX_TIME_MINUTES") {
            if let Ok(parsed) = minutes.parse() {
                self.research.max_time_minutes = parsed;
            }
        }
    }

    /// Fail fast on structurally invalid configuration. Template
    /// existence is validated separately by
    /// [`crate::templates::TemplateStore::load`], since that requires
    /// filesystem access this function deliberately avoids so that
    /// `Config::default()` alone is always valid.
    fn validate(&self) -> Result<()> {
        if self.research.max_tasks == 0 {
            return Err(ResearchError::Configuration(
                "research.max_tasks must be at least 1".to_string(),
            ));
        }
        if self.research.max_concurrent_tasks == 0 {
            return Err(ResearchError::Configuration(
                "research.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.research.max_cost_dollars <= 0.0 {
            return Err(ResearchError::Configuration(
                "research.max_cost_dollars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a named source integration is enabled, honoring
    /// `databases.<source>.enabled` (default true) and falling back to
    /// `true` for sources with no explicit entry.
    pub fn source_enabled(&self, source: &str) -> bool {
        self.databases
            .get(source)
            .map(|cfg| cfg.enabled)
            .unwrap_or(true)
    }

    /// Resolve the credential environment variable for a source, if any
    /// is configured, and read its value. Missing credentials are not an
    /// error here — the integration registry decides whether to disable
    /// the source.
    pub fn source_credential(&self, source: &str) -> Option<String> {
        let env_var = self.databases.get(source)?.credential_env.as_ref()?;
        std::env::var(env_var).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn source_enabled_defaults_true_for_unknown_source() {
        let config = Config::default();
        assert!(config.source_enabled("federal_jobs"));
    }

    #[test]
    fn source_enabled_honors_explicit_disable() {
        let mut config = Config::default();
        config.databases.insert(
            "federal_jobs".to_string(),
            DatabaseSourceConfig {
                enabled: false,
                credential_env: None,
            },
        );
        assert!(!config.source_enabled("federal_jobs"));
    }
}
