//! Report Synthesizer: turns a run's tasks, entities, and claims into the
//! final markdown report plus a coverage summary for the run directory.
//!
//! Grounded on `research/aggregator.rs::Aggregator::aggregate`/`synthesize`,
//! which folded several workers' free-text findings into one narrative via
//! a single LLM call; here the fold is over typed `Task`/`Entity`/`Claim`
//! structures and the output stays unparsed markdown rather than a second
//! structured envelope, since a report's prose does not fit a JSON schema.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RoleModelConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{Claim, CoverageGap, CoverageMetadata, Entity, Hypothesis, RawResult, Task};
use crate::templates::{self, TemplateStore};

pub struct Synthesizer {
    llm: Arc<LlmClient>,
    templates: Arc<TemplateStore>,
}

impl Synthesizer {
    pub fn new(llm: Arc<LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Render the final markdown report for a completed run.
    /// `unexecuted_hypotheses` surfaces planning-aid hypotheses that were
    /// never run as sub-tasks, per `spec.md` §4.12's optional "Suggested
    /// Investigative Angles" section.
    pub async fn synthesize(
        &self,
        question: &str,
        tasks: &[Task],
        entities: &[Entity],
        claims: &[Claim],
        coverage: &CoverageMetadata,
        unexecuted_hypotheses: &[Hypothesis],
        role: &RoleModelConfig,
    ) -> Result<String> {
        let entities_by_id: HashMap<_, _> = entities.iter().map(|e| (e.id, e.canonical_name.clone())).collect();

        let task_lines: Vec<serde_json::Value> = tasks
            .iter()
            .map(|t| serde_json::json!(format!("[{:?}] {} ({} results)", t.status, t.query, t.accumulated_results().len())))
            .collect();

        let entity_lines: Vec<serde_json::Value> = entities
            .iter()
            .map(|e| serde_json::json!(format!("{} ({:?}, risk: {:?})", e.canonical_name, e.entity_type, e.disambiguation_risk)))
            .collect();

        let claim_lines: Vec<serde_json::Value> = claims
            .iter()
            .map(|c| {
                let subject = entities_by_id.get(&c.subject_entity_id).cloned().unwrap_or_else(|| "unknown".to_string());
                let object = c
                    .object_entity_id
                    .and_then(|id| entities_by_id.get(&id).cloned())
                    .or_else(|| c.object_literal.clone())
                    .unwrap_or_default();
                serde_json::json!(format!(
                    "{subject} {} {object} ({} sources, {:?})",
                    c.predicate, c.source_count, c.predicate_tier
                ))
            })
            .collect();

        let hypotheses_section = if unexecuted_hypotheses.is_empty() {
            None
        } else {
            Some(
                unexecuted_hypotheses
                    .iter()
                    .map(|h| format!("- {}: {}", h.pathway_name, h.description))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        };

        let vars = templates::json_vars(&[
            ("question", serde_json::json!(question)),
            ("tasks", serde_json::json!(task_lines)),
            ("entities", serde_json::json!(entity_lines)),
            ("claims", serde_json::json!(claim_lines)),
            ("coverage_summary", serde_json::json!(coverage_summary(coverage))),
            ("hypotheses_section", serde_json::json!(hypotheses_section)),
        ]);
        let prompt = self.templates.render("synthesize_report", &vars)?;

        let (report, _usage) = self
            .llm
            .chat(&role.model, &[ChatMessage::user(prompt)], role.max_tokens, role.temperature)
            .await?;

        Ok(report)
    }

    /// Build the structured coverage record stored alongside the report:
    /// which sources/queries ran, domain diversity across all evidence, and
    /// explicit gaps for sources that never returned anything.
    pub fn build_coverage(&self, tasks: &[Task], known_sources: &[String]) -> CoverageMetadata {
        let mut sources_used = std::collections::BTreeSet::new();
        let mut queries_executed = Vec::new();
        let mut domain_histogram: HashMap<String, usize> = HashMap::new();
        let mut all_results: Vec<&RawResult> = Vec::new();

        for task in tasks {
            for attempt in &task.diagnostics.query_history {
                queries_executed.push(attempt.query.clone());
            }
            for selection in &task.diagnostics.source_selections {
                sources_used.extend(selection.iter().cloned());
            }
            all_results.extend(task.accumulated_results());
        }

        for result in &all_results {
            *domain_histogram.entry(result.domain.clone()).or_insert(0) += 1;
        }

        let returned: std::collections::HashSet<&str> = all_results.iter().map(|r| r.source_name.as_str()).collect();
        let known_gaps: Vec<CoverageGap> = known_sources
            .iter()
            .filter(|name| sources_used.contains(name.as_str()) && !returned.contains(name.as_str()))
            .map(|name| CoverageGap {
                source: name.clone(),
                reason: "source was queried but returned no results that survived relevance filtering".to_string(),
            })
            .collect();

        CoverageMetadata {
            sources_used: sources_used.into_iter().collect(),
            queries_executed,
            domain_histogram,
            known_gaps,
        }
    }
}

fn coverage_summary(coverage: &CoverageMetadata) -> String {
    let mut lines = vec![
        format!("Sources used: {}", coverage.sources_used.join(", ")),
        format!("Queries executed: {}", coverage.queries_executed.len()),
        format!("Distinct domains: {}", coverage.domain_histogram.len()),
    ];
    for gap in &coverage.known_gaps {
        lines.push(format!("Gap: {} — {}", gap.source, gap.reason));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::model::{QueryAttempt, TaskDiagnostics, TaskStatus};

    fn sample_result(source: &str, domain: &str) -> RawResult {
        RawResult {
            url: format!("https://{domain}/x"),
            title: "t".to_string(),
            snippet_text: "s".to_string(),
            source_name: source.to_string(),
            domain: domain.to_string(),
            fetched_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn build_coverage_flags_gaps_for_queried_but_empty_sources() {
        let synthesizer = Synthesizer::new(
            Arc::new(LlmClient::new("k", "http://localhost")),
            Arc::new(TemplateStore::from_inline("synthesize_report", "x")),
        );

        let mut task = Task::new(0, "question", "why");
        task.status = TaskStatus::Succeeded;
        task.diagnostics = TaskDiagnostics {
            query_history: vec![QueryAttempt {
                attempt: 0,
                query: "q".to_string(),
                reformulation_reason: None,
            }],
            source_selections: vec![vec!["federal_register".to_string(), "sec_edgar".to_string()]],
        };
        task.accumulate(vec![sample_result("sec_edgar", "sec.gov")]);

        let coverage = synthesizer.build_coverage(&[task], &["federal_register".to_string(), "sec_edgar".to_string()]);
        assert_eq!(coverage.known_gaps.len(), 1);
        assert_eq!(coverage.known_gaps[0].source, "federal_register");
        assert_eq!(coverage.domain_histogram.get("sec.gov"), Some(&1));
    }
}
