//! Result Accumulator & Retry Loop: drives a single task through repeated
//! execute → filter → accumulate rounds until it has enough evidence or
//! exhausts its retry budget.
//!
//! Grounded on the retry loop pseudocode in `spec.md` §4.9, using
//! [`crate::model::Task::accumulate`] as the only sanctioned mutator of
//! `accumulated_results` so the monotonicity invariant holds by
//! construction rather than by caller discipline.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::executor::{merge_sorted, ParallelExecutor};
use crate::integrations::Integration;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{QueryAttempt, Task, TaskStatus};
use crate::relevance::RelevanceFilter;
use crate::templates::{self, TemplateStore};

pub struct Accumulator {
    executor: ParallelExecutor,
    relevance: RelevanceFilter,
    llm: Arc<LlmClient>,
    templates: Arc<TemplateStore>,
}

impl Accumulator {
    pub fn new(
        executor: ParallelExecutor,
        relevance: RelevanceFilter,
        llm: Arc<LlmClient>,
        templates: Arc<TemplateStore>,
    ) -> Self {
        Self {
            executor,
            relevance,
            llm,
            templates,
        }
    }

    /// Run `task` through the retry loop, mutating it in place and setting
    /// its final `status`. `sources` is the already-selected integration
    /// set for this task (the full registry subset, or a hypothesis's
    /// pre-seeded sources).
    pub async fn run_task(&self, task: &mut Task, sources: Vec<Arc<dyn Integration>>, config: &Config) -> Result<()> {
        task.status = TaskStatus::Running;
        let mut attempt: u32 = 0;

        loop {
            let outcomes = self
                .executor
                .run(&task.query, sources.clone(), task_result_limit(config))
                .await;
            let batch = merge_sorted(&outcomes);

            let evaluation = self
                .relevance
                .evaluate(&task.query, &batch, &config.llm.analysis)
                .await?;
            let kept: Vec<_> = evaluation.keep(&batch).into_iter().cloned().collect();
            let newly_added = task.accumulate(kept);

            task.diagnostics.query_history.push(QueryAttempt {
                attempt,
                query: task.query.clone(),
                reformulation_reason: evaluation.off_topic_reason.clone(),
            });
            task.diagnostics
                .source_selections
                .push(sources.iter().map(|s| s.metadata().name).collect());
            task.relevance_scores.push(evaluation.clone());

            info!(
                task_id = %task.id,
                attempt,
                newly_added,
                total = task.accumulated_results().len(),
                "accumulator round complete"
            );

            task.retry_count = attempt;

            let have_enough = task.accumulated_results().len() >= config.research.min_results_per_task;
            let retries_exhausted = attempt >= config.research.max_retries_per_task;

            if have_enough {
                task.status = TaskStatus::Succeeded;
                return Ok(());
            }
            if retries_exhausted {
                task.status = if task.accumulated_results().is_empty() {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Succeeded
                };
                return Ok(());
            }

            task.query = self
                .reformulate(&task.query, evaluation.off_topic_reason.as_deref(), evaluation.reformulation_hint.as_deref(), config)
                .await
                .unwrap_or_else(|_| task.query.clone());

            attempt += 1;
        }
    }

    async fn reformulate(
        &self,
        current_query: &str,
        off_topic_reason: Option<&str>,
        reformulation_hint: Option<&str>,
        config: &Config,
    ) -> Result<String> {
        let vars = templates::json_vars(&[
            ("task_query", serde_json::json!(current_query)),
            ("current_query", serde_json::json!(current_query)),
            ("off_topic_reason", serde_json::json!(off_topic_reason.unwrap_or("insufficient results"))),
            ("reformulation_hint", serde_json::json!(reformulation_hint)),
        ]);
        let prompt = self.templates.render("reformulate_query", &vars)?;

        let role = &config.llm.refinement;
        let (value, _usage) = self
            .llm
            .structured(
                &role.model,
                &[ChatMessage::user(prompt)],
                "reformulate_query",
                &serde_json::json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"],
                }),
                role.max_tokens,
            )
            .await?;

        Ok(value["query"].as_str().unwrap_or(current_query).to_string())
    }
}

fn task_result_limit(config: &Config) -> usize {
    (config.research.min_results_per_task * 3).max(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_result_limit_scales_with_min_results() {
        let mut config = Config::default();
        config.research.min_results_per_task = 2;
        assert_eq!(task_result_limit(&config), 10);
        config.research.min_results_per_task = 10;
        assert_eq!(task_result_limit(&config), 30);
    }
}
