//! Hypothesis Generator: proposes named investigative pathways for a task
//! before execution, either as a planning aid surfaced in the final report
//! or as additional sub-tasks to execute.
//!
//! Grounded on `research/worker.rs::generate_subtopics`'s single structured
//! call over a fixed-size list, generalized to the hypothesis schema and to
//! the branching-mode switch in `spec.md` §4.7.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::config::{Config, HypothesisMode};
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{Hypothesis, SourceMetadata};
use crate::templates::{self, TemplateStore};

pub struct HypothesisGenerator {
    llm: Arc<LlmClient>,
    templates: Arc<TemplateStore>,
}

impl HypothesisGenerator {
    pub fn new(llm: Arc<LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Generate 1..=5 hypotheses for `task_query`, adaptively sized by
    /// question specificity: a narrow query yields few or zero hypotheses,
    /// a broad one yields more. `sources` is the available registry
    /// metadata so the model can only propose source names that exist.
    pub async fn generate(
        &self,
        question: &str,
        task_query: &str,
        sources: &[SourceMetadata],
        config: &Config,
    ) -> Result<Vec<Hypothesis>> {
        let rendered_sources: Vec<serde_json::Value> = sources
            .iter()
            .map(|s| serde_json::json!({"name": s.name, "description": s.description}))
            .collect();

        let vars = templates::json_vars(&[
            ("question", serde_json::json!(question)),
            ("task_query", serde_json::json!(task_query)),
            ("sources", serde_json::json!(rendered_sources)),
        ]);
        let prompt = self.templates.render("generate_hypotheses", &vars)?;

        let role = &config.llm.hypothesis;
        let (value, _usage) = self
            .llm
            .structured(&role.model, &[ChatMessage::user(prompt)], "generate_hypotheses", &schema(), role.max_tokens)
            .await?;

        let known_sources: HashSet<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        let mut hypotheses = parse_hypotheses(&value, &known_sources);
        hypotheses.sort_by_key(|h| h.priority);
        hypotheses.truncate(5);

        info!(
            count = hypotheses.len(),
            mode = ?config.research.hypothesis_branching.mode,
            "generated hypotheses for task"
        );

        Ok(hypotheses)
    }

    /// Whether a generated hypothesis should become its own sub-[`Task`]
    /// rather than remain a planning aid surfaced only in the report.
    pub fn should_execute(config: &Config) -> bool {
        config.research.hypothesis_branching.enabled
            && matches!(config.research.hypothesis_branching.mode, HypothesisMode::Executed)
    }
}

fn parse_hypotheses(value: &serde_json::Value, known_sources: &HashSet<&str>) -> Vec<Hypothesis> {
    value["hypotheses"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| {
            let pathway_name = h["pathway_name"].as_str()?.to_string();
            let sources: Vec<String> = h["sources"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .filter_map(|s| s.as_str())
                .filter(|s| known_sources.contains(s))
                .map(|s| s.to_string())
                .collect();

            Some(Hypothesis {
                pathway_name,
                description: h["description"].as_str().unwrap_or_default().to_string(),
                priority: h["priority"].as_u64().unwrap_or(99) as u32,
                confidence: h["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
                sources,
                signals: string_array(&h["signals"]),
                expected_entities: string_array(&h["expected_entities"]),
                rationale: h["rationale"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

fn string_array(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.to_string())
        .collect()
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "hypotheses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "pathway_name": {"type": "string"},
                        "description": {"type": "string"},
                        "priority": {"type": "integer"},
                        "confidence": {"type": "number"},
                        "sources": {"type": "array", "items": {"type": "string"}},
                        "signals": {"type": "array", "items": {"type": "string"}},
                        "expected_entities": {"type": "array", "items": {"type": "string"}},
                        "rationale": {"type": "string"},
                    },
                    "required": ["pathway_name", "description", "priority", "confidence", "sources", "rationale"],
                },
            },
        },
        "required": ["hypotheses"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hypotheses_drops_unknown_source_names() {
        let known: HashSet<&str> = ["federal_register", "sec_edgar"].into_iter().collect();
        let value = serde_json::json!({
            "hypotheses": [{
                "pathway_name": "regulatory trail",
                "description": "d",
                "priority": 1,
                "confidence": 0.7,
                "sources": ["federal_register", "made_up_source"],
                "signals": [],
                "expected_entities": [],
                "rationale": "r",
            }]
        });
        let hypotheses = parse_hypotheses(&value, &known);
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].sources, vec!["federal_register".to_string()]);
    }

    #[test]
    fn parse_hypotheses_clamps_confidence_into_unit_range() {
        let known: HashSet<&str> = HashSet::new();
        let value = serde_json::json!({
            "hypotheses": [{
                "pathway_name": "p",
                "description": "d",
                "priority": 1,
                "confidence": 4.5,
                "sources": [],
                "rationale": "r",
            }]
        });
        let hypotheses = parse_hypotheses(&value, &known);
        assert_eq!(hypotheses[0].confidence, 1.0);
    }

    #[test]
    fn should_execute_requires_both_enabled_and_executed_mode() {
        let mut config = Config::default();
        assert!(!HypothesisGenerator::should_execute(&config));
        config.research.hypothesis_branching.enabled = true;
        assert!(!HypothesisGenerator::should_execute(&config));
        config.research.hypothesis_branching.mode = HypothesisMode::Executed;
        assert!(HypothesisGenerator::should_execute(&config));
    }
}
