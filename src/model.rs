//! Data model for the research engine.
//!
//! These are the types described as the "Data Model" in the engine design:
//! research questions, subtasks, hypotheses, source metadata, query plans,
//! raw search results, relevance evaluations, entities, claims, and the
//! top-level run record. Every type here is `Serialize`/`Deserialize` since
//! the whole model is written once to an append-only run directory.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// The identity key for a [`RawResult`]: its URL. Claims and entities
/// reference evidence by this key rather than by a synthetic ID so that
/// "does this claim's evidence resolve to a stored result" is a direct
/// lookup rather than an indirection.
pub type EvidenceId = String;

/// The untyped input plus the resolved configuration used to produce a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub question: String,
    pub config: Config,
}

impl ResearchQuestion {
    pub fn new(question: impl Into<String>, config: Config) -> Self {
        Self {
            question: question.into(),
            config,
        }
    }
}

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// A single investigative subtask produced by decomposition (or by an
/// executed hypothesis). Owns its own query history, accumulated evidence,
/// and extracted entities/claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub ordinal: u32,
    pub query: String,
    pub rationale: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Monotonically growing, deduplicated-by-URL across retries. Only
    /// `Task::accumulate` may extend this; there is no public setter.
    accumulated_results: Vec<RawResult>,
    seen_urls: HashSet<String>,
    pub hypotheses: Option<Vec<Hypothesis>>,
    pub relevance_scores: Vec<RelevanceEvaluation>,
    pub entities: Vec<Entity>,
    pub claims: Vec<Claim>,
    pub diagnostics: TaskDiagnostics,
    /// Set when this task was spawned from an executed hypothesis rather
    /// than the top-level decomposer; carries the pre-seeded source set.
    pub seeded_sources: Option<Vec<String>>,
}

impl Task {
    pub fn new(ordinal: u32, query: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ordinal,
            query: query.into(),
            rationale: rationale.into(),
            status: TaskStatus::Pending,
            retry_count: 0,
            accumulated_results: Vec::new(),
            seen_urls: HashSet::new(),
            hypotheses: None,
            relevance_scores: Vec::new(),
            entities: Vec::new(),
            claims: Vec::new(),
            diagnostics: TaskDiagnostics::default(),
            seeded_sources: None,
        }
    }

    /// Build a task standing in for an executed hypothesis: same contract
    /// as a decomposed subtask, but with a pre-filtered source set.
    pub fn from_hypothesis(ordinal: u32, parent_query: &str, hyp: &Hypothesis) -> Self {
        let mut task = Task::new(
            ordinal,
            format!("{parent_query} — {}", hyp.pathway_name),
            hyp.rationale.clone(),
        );
        task.seeded_sources = Some(hyp.sources.clone());
        task
    }

    pub fn accumulated_results(&self) -> &[RawResult] {
        &self.accumulated_results
    }

    /// Merge `fresh` into the accumulated set, deduplicating by URL.
    /// Never shrinks the existing set. Returns the number of genuinely new
    /// results added.
    pub fn accumulate(&mut self, fresh: Vec<RawResult>) -> usize {
        let before = self.accumulated_results.len();
        for result in fresh {
            if self.seen_urls.insert(result.url.clone()) {
                self.accumulated_results.push(result);
            }
        }
        self.accumulated_results.len() - before
    }
}

/// Free-form diagnostics accumulated across a task's attempts: the query
/// used on each attempt, which sources were selected, and the relevance
/// scores returned — enough to reconstruct why a task ended up the way it
/// did without re-running it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDiagnostics {
    pub query_history: Vec<QueryAttempt>,
    pub source_selections: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAttempt {
    pub attempt: u32,
    pub query: String,
    pub reformulation_reason: Option<String>,
}

/// A named investigative pathway generated before execution. May remain a
/// planning aid (surfaced in the report) or be executed as a sub-[`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub pathway_name: String,
    pub description: String,
    pub priority: u32,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub signals: Vec<String>,
    pub expected_entities: Vec<String>,
    pub rationale: String,
}

/// Stable-for-the-life-of-the-process description of a source integration,
/// used by the LLM to choose which sources to query for a given question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
    pub requires_credential: bool,
    pub rate_limit_hint: String,
}

/// A source-specific set of query parameters produced by an integration's
/// LLM-driven query generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub source: String,
    pub params: serde_json::Value,
    pub reasoning: String,
}

/// A normalized search hit. `url` is the deduplication key across an
/// entire task's history; `snippet_text` is stored verbatim and is never
/// summarized before storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RawResult {
    pub url: String,
    pub title: String,
    pub snippet_text: String,
    pub source_name: String,
    pub domain: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The outcome of a single relevance-filter call over a batch of
/// [`RawResult`]s: which indices survive, the full score distribution for
/// transparency, and — if the batch was mostly off-topic — a reason and a
/// hint for reformulating the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceEvaluation {
    pub relevant_indices: BTreeSet<usize>,
    pub scores: Vec<u8>,
    pub off_topic_reason: Option<String>,
    pub reformulation_hint: Option<String>,
}

impl RelevanceEvaluation {
    /// Items at `relevant_indices`, in original order. This is the only
    /// sanctioned way to read "what survived the filter" — nothing
    /// downstream should look at `batch` directly without going through
    /// this so that items outside `relevant_indices` never leak.
    pub fn keep<'a>(&self, batch: &'a [RawResult]) -> Vec<&'a RawResult> {
        self.relevant_indices
            .iter()
            .filter_map(|&i| batch.get(i))
            .collect()
    }
}

/// Coarse entity type. The MVP disambiguates only by these five buckets;
/// finer-grained subtyping is left to `aliases`/`disambiguation_risk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Program,
    Concept,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A named thing extracted from evidence. Uniqueness is by
/// `canonical_name` within a run; merging across tasks is exact-match only
/// (see [`crate::extraction::merge_entities`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    pub first_seen_evidence_id: EvidenceId,
    pub disambiguation_risk: RiskLevel,
    pub llm_confidence: f64,
}

/// How literally a claim's predicate is supported by the underlying text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateTier {
    /// Directly and explicitly asserted by the source text.
    Strong,
    /// Implied, hedged, or inferred rather than stated outright.
    Weak,
    /// A claim about the research process itself (e.g. "X was reported by").
    Meta,
}

/// A subject-predicate-object assertion grounded in one or more
/// [`RawResult`]s. `source_count` and `domain_diversity` are always
/// computed from `evidence_ids`, never extracted from the LLM response —
/// see [`Claim::compute_provenance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub subject_entity_id: Uuid,
    pub predicate: String,
    pub object_entity_id: Option<Uuid>,
    pub object_literal: Option<String>,
    pub predicate_tier: PredicateTier,
    pub evidence_ids: Vec<EvidenceId>,
    pub source_count: usize,
    pub domain_diversity: usize,
    pub llm_confidence: f64,
}

impl Claim {
    /// Recompute `source_count`/`domain_diversity` by joining
    /// `evidence_ids` against the full set of results gathered so far.
    /// `results_by_url` must contain every evidence id referenced, or the
    /// unresolvable ids are simply excluded from the counts (callers are
    /// expected to have already validated groundedness — see
    /// [`crate::extraction::validate_claim_groundedness`]).
    pub fn compute_provenance(&mut self, results_by_url: &HashMap<String, RawResult>) {
        let mut sources = HashSet::new();
        let mut domains = HashSet::new();
        for id in &self.evidence_ids {
            if let Some(result) = results_by_url.get(id) {
                sources.insert(result.source_name.clone());
                domains.insert(result.domain.clone());
            }
        }
        self.source_count = sources.len();
        self.domain_diversity = domains.len();
    }
}

/// What was searched, what returned, and what is known to be missing.
/// Surfaced prominently in the final report per the engine's
/// "observability over correctness" design principle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageMetadata {
    pub sources_used: Vec<String>,
    pub queries_executed: Vec<String>,
    pub domain_histogram: HashMap<String, usize>,
    pub known_gaps: Vec<CoverageGap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageGap {
    pub source: String,
    pub reason: String,
}

/// Run-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    Decomposing,
    Executing,
    Extracting,
    Synthesizing,
    Finalized,
    Aborted,
}

/// One end-to-end execution of the engine, serialized once to an
/// append-only run directory on completion. Nothing in a finished `Run`
/// is mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub question: String,
    pub config_snapshot: Config,
    pub state: RunState,
    pub tasks: Vec<Task>,
    pub entities: Vec<Entity>,
    pub claims: Vec<Claim>,
    pub cost_usd: f64,
    pub duration_ms: i64,
    pub coverage_metadata: CoverageMetadata,
    pub report_markdown: String,
    pub diagnostics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
