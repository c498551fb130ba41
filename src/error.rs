//! Error taxonomy for the research engine.
//!
//! Mirrors the layered taxonomy from the engine design: fatal configuration
//! errors, per-source credential and integration errors, per-call LLM
//! errors, and a run-level budget-exceeded signal. Only the errors
//! [`ResearchError::is_fatal`] flags (`Configuration`, `TemplateNotFound`,
//! `UndefinedVariable`) are allowed to unwind out of
//! [`crate::orchestrator::run_research`]; `BudgetExceeded` is checked
//! proactively between stages and turns into a skipped task or an aborted
//! run rather than ever being raised and propagated, and everything else is
//! caught and recorded on the affected [`crate::model::Task`].

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResearchError>;

#[derive(Error, Debug)]
pub enum ResearchError {
    /// Missing required template or invalid config. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing API key for an enabled source. The source is disabled; the
    /// run continues without it.
    #[error("missing credential for source '{source_name}': {detail}")]
    Credential { source_name: String, detail: String },

    /// Wraps all per-source failures.
    #[error("integration error ({kind:?}, source={source_name}): {detail}")]
    Integration {
        source_name: String,
        kind: IntegrationErrorKind,
        retryable: bool,
        detail: String,
    },

    /// Wraps all per-call LLM failures.
    #[error("llm error ({kind:?}): {detail}")]
    Llm { kind: LlmErrorKind, detail: String },

    /// A structured-output call returned JSON that did not conform to the
    /// requested schema, even after the strengthened retry.
    #[error("structured output for '{call}' did not conform to schema: {detail}")]
    StructuredOutput { call: String, detail: String },

    /// Loaded template referenced a variable not present at a render call
    /// site.
    #[error("template '{template}' references undefined variable '{variable}'")]
    UndefinedVariable { template: String, variable: String },

    /// Referenced a template path that was not found at load time.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The run's wall-clock or cost budget was exceeded. Propagates to the
    /// orchestrator and moves the run to `aborted`; never surfaces past
    /// `run_research`.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationErrorKind {
    Transport,
    RateLimit,
    Auth,
    SchemaMismatch,
    Empty,
}

impl IntegrationErrorKind {
    /// Only `Transport` failures are retryable, and only inside the call
    /// site that issued the request.
    pub fn is_retryable(self) -> bool {
        matches!(self, IntegrationErrorKind::Transport)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Transport,
    RateLimit,
    SchemaViolation,
    TokenBudget,
}

impl ResearchError {
    pub fn integration(
        source: impl Into<String>,
        kind: IntegrationErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        let retryable = kind.is_retryable();
        ResearchError::Integration {
            source_name: source.into(),
            kind,
            retryable,
            detail: detail.into(),
        }
    }

    pub fn llm(kind: LlmErrorKind, detail: impl Into<String>) -> Self {
        ResearchError::Llm {
            kind,
            detail: detail.into(),
        }
    }

    /// `true` for errors that represent an unrecoverable configuration or
    /// template problem — the only class allowed to abort `run_research`
    /// outright rather than being recorded per-task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResearchError::Configuration(_)
                | ResearchError::TemplateNotFound(_)
                | ResearchError::UndefinedVariable { .. }
        )
    }
}
