//! Deep Research Orchestrator: the top-level state machine that drives a
//! `ResearchQuestion` through decomposition, per-task retrieval, optional
//! hypothesis branching, extraction, and synthesis, under a wall-clock and
//! cost budget.
//!
//! Grounded on `research/worker.rs::ResearchOrchestrator::execute`'s
//! generate-subtopics → spawn-workers → collect → aggregate shape,
//! generalized from a flat worker fan-out into the full multi-stage
//! pipeline with budget checks between stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::accumulator::Accumulator;
use crate::config::Config;
use crate::decomposer::Decomposer;
use crate::error::{ResearchError, Result};
use crate::executor::ParallelExecutor;
use crate::extraction::{merge_entities, Extractor};
use crate::hypothesis::HypothesisGenerator;
use crate::integrations::{Integration, IntegrationContext, IntegrationRegistry};
use crate::llm::LlmClient;
use crate::model::{Hypothesis, Run, RunState, Task, TaskStatus};
use crate::relevance::RelevanceFilter;
use crate::run_store::RunStore;
use crate::synthesizer::Synthesizer;
use crate::templates::TemplateStore;
use crate::tracker::Tracker;

/// The resources a research run needs for its whole lifetime, assembled
/// once by the caller (typically the CLI entry point) and handed to
/// [`run_research`].
pub struct Engine {
    pub llm: Arc<LlmClient>,
    pub templates: Arc<TemplateStore>,
    pub tracker: Arc<Tracker>,
    pub http: reqwest::Client,
}

impl Engine {
    pub fn new(llm: Arc<LlmClient>, templates: Arc<TemplateStore>, tracker: Arc<Tracker>) -> Self {
        Self {
            llm,
            templates,
            tracker,
            http: reqwest::Client::new(),
        }
    }
}

struct Budget {
    deadline: Instant,
    max_cost_dollars: f64,
}

impl Budget {
    fn from_config(config: &Config) -> Self {
        Self {
            deadline: Instant::now() + Duration::from_secs(config.research.max_time_minutes * 60),
            max_cost_dollars: config.research.max_cost_dollars,
        }
    }

    fn check(&self, llm: &LlmClient) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(ResearchError::BudgetExceeded("wall-clock deadline reached".to_string()));
        }
        let spent = llm.cost_accumulator().total_cost_usd();
        if spent >= self.max_cost_dollars {
            return Err(ResearchError::BudgetExceeded(format!(
                "cost ceiling of ${:.2} reached (spent ${:.2})",
                self.max_cost_dollars, spent
            )));
        }
        Ok(())
    }
}

/// Run one end-to-end research session and return the finished [`Run`].
/// Budget overruns abort remaining stages gracefully (the run still
/// synthesizes a report from whatever was gathered) rather than
/// propagating out of this function — `spec.md` §4.11's "always produce a
/// report" guarantee.
pub async fn run_research(engine: &Engine, question: &str, config: Config) -> Result<Run> {
    let started_at = chrono::Utc::now();
    let config = Arc::new(config);
    let budget = Budget::from_config(&config);
    let store = RunStore::create(&config, started_at, question)?;
    store.write_run_config(&config)?;

    let ctx = IntegrationContext {
        http: engine.http.clone(),
        llm: engine.llm.clone(),
        templates: engine.templates.clone(),
        tracker: engine.tracker.clone(),
        config: config.clone(),
    };
    let registry = Arc::new(IntegrationRegistry::build(ctx));
    if registry.is_empty() {
        warn!("no source integrations are enabled or credentialed; run will gather no evidence");
    }

    let decomposer = Decomposer::new(engine.llm.clone(), engine.templates.clone());
    let hypothesis_generator = HypothesisGenerator::new(engine.llm.clone(), engine.templates.clone());
    let relevance_filter = RelevanceFilter::new(engine.llm.clone(), engine.templates.clone());
    let executor = ParallelExecutor::new(config.research.max_concurrent_tasks);
    let accumulator = Accumulator::new(executor, relevance_filter, engine.llm.clone(), engine.templates.clone());
    let extractor = Extractor::new(engine.llm.clone(), engine.templates.clone());
    let synthesizer = Synthesizer::new(engine.llm.clone(), engine.templates.clone());

    store.append_event("entering decomposing stage")?;
    let mut tasks = match decomposer.decompose(question, &config).await {
        Ok(tasks) => tasks,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            warn!(%err, "decomposition failed, aborting run");
            return Ok(finalize_aborted(question, &config, started_at, &store, err.to_string()));
        }
    };
    store.write_decomposition(&tasks)?;
    store.append_event("decomposition complete")?;

    let mut all_hypotheses: Vec<Hypothesis> = Vec::new();
    let mut unexecuted_hypotheses: Vec<Hypothesis> = Vec::new();

    if config.research.hypothesis_branching.enabled {
        let metadata = registry.metadata_for_selection();
        let mut extra_tasks = Vec::new();
        for task in &mut tasks {
            if budget.check(&engine.llm).is_err() {
                break;
            }
            match hypothesis_generator.generate(question, &task.query, &metadata, &config).await {
                Ok(hypotheses) => {
                    if HypothesisGenerator::should_execute(&config) {
                        for hyp in &hypotheses {
                            let mut sub_task = Task::from_hypothesis(0, &task.query, hyp);
                            sub_task.hypotheses = Some(vec![hyp.clone()]);
                            extra_tasks.push(sub_task);
                        }
                    } else {
                        unexecuted_hypotheses.extend(hypotheses.clone());
                    }
                    task.hypotheses = Some(hypotheses.clone());
                    all_hypotheses.extend(hypotheses);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(%err, task_id = %task.id, "hypothesis generation failed for task"),
            }
        }
        let base_ordinal = tasks.len() as u32;
        for (offset, mut sub_task) in extra_tasks.into_iter().enumerate() {
            sub_task.ordinal = base_ordinal + offset as u32;
            tasks.push(sub_task);
        }
        store.write_hypotheses(&all_hypotheses)?;
    }

    info!(state = ?RunState::Executing, task_count = tasks.len(), "entering execution stage");

    for task in &mut tasks {
        if let Err(err) = budget.check(&engine.llm) {
            warn!(%err, task_id = %task.id, "budget exceeded, skipping remaining tasks");
            task.status = TaskStatus::Skipped;
            continue;
        }

        let sources = select_sources(&registry, task);
        if sources.is_empty() {
            task.status = TaskStatus::Skipped;
            continue;
        }

        if let Err(err) = accumulator.run_task(task, sources, &config).await {
            if err.is_fatal() {
                return Err(err);
            }
            warn!(%err, task_id = %task.id, "task failed");
            task.status = TaskStatus::Failed;
        }
        store.write_task(task)?;
        store.append_event(&format!("task {} finished with status {:?}", task.ordinal, task.status))?;
    }

    store.append_event("entering extracting stage")?;
    let mut all_entities = Vec::new();
    let mut all_claims = Vec::new();
    for task in &mut tasks {
        if task.status != TaskStatus::Succeeded {
            continue;
        }
        match extractor.extract(task, &config.llm.extraction).await {
            Ok((entities, claims)) => {
                task.entities = entities.clone();
                task.claims = claims.clone();
                all_entities.extend(entities);
                all_claims.extend(claims);
                store.write_task(task)?;
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => warn!(%err, task_id = %task.id, "extraction failed for task"),
        }
    }
    let all_entities = merge_entities(all_entities);
    store.append_event("extraction complete")?;

    store.append_event("entering synthesizing stage")?;
    let known_sources: Vec<String> = registry.metadata_for_selection().into_iter().map(|m| m.name).collect();
    let coverage = synthesizer.build_coverage(&tasks, &known_sources);
    store.write_coverage(&coverage)?;

    let report_markdown = synthesizer
        .synthesize(question, &tasks, &all_entities, &all_claims, &coverage, &unexecuted_hypotheses, &config.llm.synthesis)
        .await
        .unwrap_or_else(|err| format!("# Report synthesis failed\n\n{err}"));
    store.write_report(&report_markdown)?;

    let cost_usd = engine.llm.cost_accumulator().total_cost_usd();
    let per_model = serde_json::to_value(engine.llm.cost_accumulator().per_model_breakdown())?;
    store.write_cost(cost_usd, &per_model)?;

    let finished_at = chrono::Utc::now();
    let run = Run {
        id: uuid::Uuid::new_v4(),
        question: question.to_string(),
        config_snapshot: (*config).clone(),
        state: RunState::Finalized,
        tasks,
        entities: all_entities,
        claims: all_claims,
        cost_usd,
        duration_ms: (finished_at - started_at).num_milliseconds(),
        coverage_metadata: coverage,
        report_markdown,
        diagnostics: Vec::new(),
        started_at,
        finished_at: Some(finished_at),
    };
    store.write_run(&run)?;
    store.append_event("run finalized")?;

    Ok(run)
}

/// Pick the sources a task should query: a hypothesis-seeded task is
/// restricted to its pre-selected sources; a plain decomposed task gets
/// the full registry.
fn select_sources(registry: &IntegrationRegistry, task: &Task) -> Vec<Arc<dyn Integration>> {
    match &task.seeded_sources {
        Some(names) => names.iter().filter_map(|n| registry.get(n)).collect(),
        None => registry.all(),
    }
}

fn finalize_aborted(question: &str, config: &Config, started_at: chrono::DateTime<chrono::Utc>, store: &RunStore, reason: String) -> Run {
    let finished_at = chrono::Utc::now();
    let run = Run {
        id: uuid::Uuid::new_v4(),
        question: question.to_string(),
        config_snapshot: config.clone(),
        state: RunState::Aborted,
        tasks: Vec::new(),
        entities: Vec::new(),
        claims: Vec::new(),
        cost_usd: 0.0,
        duration_ms: (finished_at - started_at).num_milliseconds(),
        coverage_metadata: Default::default(),
        report_markdown: format!("# Research aborted\n\n{reason}"),
        diagnostics: vec![reason],
        started_at,
        finished_at: Some(finished_at),
    };
    let _ = store.write_run(&run);
    run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn select_sources_restricts_to_seeded_set_when_present() {
        let mut task = Task::new(0, "q", "r");
        task.seeded_sources = Some(vec!["nonexistent_source".to_string()]);
        let ctx = IntegrationContext {
            http: reqwest::Client::new(),
            llm: Arc::new(LlmClient::new("k", "http://localhost")),
            templates: Arc::new(TemplateStore::from_inline("generate_query", "x")),
            tracker: Tracker::in_memory(std::env::temp_dir().join("orchestrator_test.jsonl")).await.unwrap(),
            config: Arc::new(Config::default()),
        };
        let registry = IntegrationRegistry::build(ctx);
        assert!(select_sources(&registry, &task).is_empty());
    }
}
