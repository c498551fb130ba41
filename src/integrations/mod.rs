//! Source Integration Registry and the uniform four-operation plugin
//! contract every concrete source implements.
//!
//! Grounded on the teacher's `github::search::SearchQuery` builder shape
//! (query objects as plain structs with a handful of optional filters) and
//! `research/worker.rs`'s `ResearchOrchestrator` for the relevance → query-gen
//! → execute call order, generalized from one GitHub cache query type into
//! ten independent HTTP-backed sources behind a single trait object.

mod academic_search;
mod cleared_jobs;
mod congress_gov;
mod contracts_sam;
mod federal_jobs;
mod federal_register;
mod news_search;
mod sec_edgar;
mod uspto_patents;
mod web_search;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{QueryPlan, RawResult, SourceMetadata};
use crate::templates::{self, TemplateStore};
use crate::tracker::Tracker;

/// Everything a concrete integration needs to do its job, bundled so the
/// registry can construct all ten sources uniformly. Cheap to clone — every
/// field is an `Arc` or a `reqwest::Client` (itself internally `Arc`-backed).
#[derive(Clone)]
pub struct IntegrationContext {
    pub http: reqwest::Client,
    pub llm: Arc<LlmClient>,
    pub templates: Arc<TemplateStore>,
    pub tracker: Arc<Tracker>,
    pub config: Arc<Config>,
}

/// The uniform contract from the engine design's source integration plugin:
/// a relevance gate, LLM-driven query generation, and search execution that
/// normalizes into the common [`RawResult`] shape.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Stable description used for LLM-driven source selection. Never fails.
    fn metadata(&self) -> SourceMetadata;

    /// Cheap relevance gate — keyword match or a tiny heuristic, not a full
    /// LLM call, to avoid spending budget on sources with no chance of
    /// returning anything useful for `question`.
    async fn is_relevant(&self, question: &str) -> bool;

    /// LLM-driven, schema-constrained query generation. Returns `None` to
    /// signal "skip this source for this question" without it being an
    /// error.
    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>>;

    /// The actual I/O. Must normalize results into [`RawResult`] and surface
    /// failures as `ResearchError::Integration` with the correct
    /// `IntegrationErrorKind`.
    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>>;

    /// Name used as the registry key and as `RawResult::source_name`.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Immutable after startup, per `spec.md` §5's shared-resource policy.
pub struct IntegrationRegistry {
    sources: HashMap<&'static str, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    /// Build the registry with all ten sources, filtering out any whose
    /// required credential is absent from the environment — per
    /// `spec.md` §6, a missing credential disables the integration rather
    /// than failing startup.
    pub fn build(ctx: IntegrationContext) -> Self {
        let candidates: Vec<Arc<dyn Integration>> = vec![
            Arc::new(federal_jobs::FederalJobsIntegration::new(ctx.clone())),
            Arc::new(cleared_jobs::ClearedJobsIntegration::new(ctx.clone())),
            Arc::new(contracts_sam::ContractsSamIntegration::new(ctx.clone())),
            Arc::new(federal_register::FederalRegisterIntegration::new(ctx.clone())),
            Arc::new(congress_gov::CongressGovIntegration::new(ctx.clone())),
            Arc::new(sec_edgar::SecEdgarIntegration::new(ctx.clone())),
            Arc::new(uspto_patents::UsptoPatentsIntegration::new(ctx.clone())),
            Arc::new(academic_search::AcademicSearchIntegration::new(ctx.clone())),
            Arc::new(news_search::NewsSearchIntegration::new(ctx.clone())),
            Arc::new(web_search::WebSearchIntegration::new(ctx.clone())),
        ];

        let mut sources = HashMap::new();
        for candidate in candidates {
            let meta = candidate.metadata();
            if !ctx.config.source_enabled(&meta.name) {
                info!(source = %meta.name, "source disabled by configuration");
                continue;
            }
            if meta.requires_credential && ctx.config.source_credential(&meta.name).is_none() {
                warn!(source = %meta.name, "missing credential, disabling source");
                continue;
            }
            sources.insert(candidate.name(), candidate);
        }

        Self { sources }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.sources.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Integration>> {
        self.sources.values().cloned().collect()
    }

    pub fn metadata_for_selection(&self) -> Vec<SourceMetadata> {
        self.sources.values().map(|i| i.metadata()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Render `generate_query`, call the LLM's structured endpoint against
/// `schema`, and translate its `{params, reasoning}` envelope into a
/// `QueryPlan` (or `None` if the source declined the subtask). Shared by
/// every concrete integration so the prompt-rendering and null-handling
/// logic lives in exactly one place; each integration supplies only its own
/// schema and description.
pub(crate) async fn generate_query_plan(
    ctx: &IntegrationContext,
    source: &str,
    description: &str,
    schema: &serde_json::Value,
    question: &str,
) -> Result<Option<QueryPlan>> {
    let vars = templates::json_vars(&[
        ("source_name", serde_json::json!(source)),
        ("source_description", serde_json::json!(description)),
        ("task_query", serde_json::json!(question)),
        ("source_schema", serde_json::json!(schema.to_string())),
    ]);
    let prompt = ctx.templates.render("generate_query", &vars)?;

    let role = &ctx.config.llm.query_generation;
    let (value, _usage) = ctx
        .llm
        .structured(
            &role.model,
            &[ChatMessage::user(prompt)],
            "generate_query",
            &serde_json::json!({
                "type": "object",
                "properties": {
                    "params": {},
                    "reasoning": {"type": "string"},
                },
                "required": ["params", "reasoning"],
            }),
            role.max_tokens,
        )
        .await?;

    if value["params"].is_null() {
        return Ok(None);
    }

    Ok(Some(QueryPlan {
        source: source.to_string(),
        params: value["params"].clone(),
        reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
    }))
}

/// Shared keyword-overlap relevance heuristic used by most sources: true if
/// any of `keywords` appears as a whole word in `question`, case-insensitive.
/// Cheap enough to run for every source on every task without an LLM call.
pub(crate) fn keyword_overlap(question: &str, keywords: &[&str]) -> bool {
    let lower = question.to_lowercase();
    keywords.iter().any(|kw| lower.contains(&kw.to_lowercase()))
}

/// GET `url` with `params`, log the call through the shared tracker, and
/// surface non-2xx/transport failures as the right `IntegrationErrorKind`.
/// Every concrete integration's `execute` funnels through this so the
/// retry/logging/masking policy lives in one place.
pub(crate) async fn fetch_json(
    ctx: &IntegrationContext,
    source: &str,
    url: &str,
    params: &[(&str, String)],
) -> Result<serde_json::Value> {
    let start = std::time::Instant::now();
    let outcome = ctx
        .http
        .get(url)
        .query(params)
        .timeout(Duration::from_secs(20))
        .send()
        .await;

    let sanitized = serde_json::json!(params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect::<HashMap<_, _>>());

    let result = match outcome {
        Ok(response) => {
            let status = response.status();
            if status.as_u16() == 429 {
                ctx.tracker
                    .log_call(source, url, 429, start.elapsed(), Some("rate limited".to_string()), sanitized)
                    .await;
                return Err(ResearchError::integration(
                    source,
                    IntegrationErrorKind::RateLimit,
                    "received HTTP 429",
                ));
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                ctx.tracker
                    .log_call(source, url, status.as_u16(), start.elapsed(), Some("auth failure".to_string()), sanitized)
                    .await;
                return Err(ResearchError::integration(
                    source,
                    IntegrationErrorKind::Auth,
                    format!("authentication failed with status {status}"),
                ));
            }
            if !status.is_success() {
                ctx.tracker
                    .log_call(source, url, status.as_u16(), start.elapsed(), Some(format!("status {status}")), sanitized)
                    .await;
                return Err(ResearchError::integration(
                    source,
                    IntegrationErrorKind::Transport,
                    format!("unexpected status {status}"),
                ));
            }
            match response.json::<serde_json::Value>().await {
                Ok(body) => {
                    ctx.tracker.log_call(source, url, status.as_u16(), start.elapsed(), None, sanitized).await;
                    Ok(body)
                }
                Err(err) => {
                    ctx.tracker
                        .log_call(source, url, status.as_u16(), start.elapsed(), Some(err.to_string()), sanitized)
                        .await;
                    Err(ResearchError::integration(
                        source,
                        IntegrationErrorKind::SchemaMismatch,
                        format!("response body was not valid JSON: {err}"),
                    ))
                }
            }
        }
        Err(err) => {
            ctx.tracker
                .log_call(source, url, 0, start.elapsed(), Some(err.to_string()), sanitized)
                .await;
            Err(ResearchError::integration(source, IntegrationErrorKind::Transport, err.to_string()))
        }
    };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_overlap_matches_case_insensitively() {
        assert!(keyword_overlap("Federal JOBS in DC", &["jobs"]));
        assert!(!keyword_overlap("unrelated topic", &["jobs", "career"]));
    }

    #[tokio::test]
    async fn registry_excludes_sources_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::in_memory(dir.path().join("api_requests.jsonl")).await.unwrap();
        let ctx = IntegrationContext {
            http: reqwest::Client::new(),
            llm: Arc::new(LlmClient::new("test-key", "http://localhost")),
            templates: Arc::new(TemplateStore::from_inline("generate_query", "{{source_name}}")),
            tracker,
            config: Arc::new(Config::default()),
        };

        let registry = IntegrationRegistry::build(ctx);

        // federal_register and academic_search require no credential; the
        // rest require one that is never set in this test environment.
        assert!(registry.get("federal_register").is_some());
        assert!(registry.get("academic_search").is_some());
        assert!(registry.get("federal_jobs").is_none());
        assert!(registry.get("web_search").is_none());
    }

    #[tokio::test]
    async fn registry_honors_explicit_source_disable() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::in_memory(dir.path().join("api_requests.jsonl")).await.unwrap();
        let mut config = Config::default();
        config.databases.insert(
            "federal_register".to_string(),
            crate::config::DatabaseSourceConfig {
                enabled: false,
                credential_env: None,
            },
        );
        let ctx = IntegrationContext {
            http: reqwest::Client::new(),
            llm: Arc::new(LlmClient::new("test-key", "http://localhost")),
            templates: Arc::new(TemplateStore::from_inline("generate_query", "{{source_name}}")),
            tracker,
            config: Arc::new(config),
        };

        let registry = IntegrationRegistry::build(ctx);
        assert!(registry.get("federal_register").is_none());
    }
}
