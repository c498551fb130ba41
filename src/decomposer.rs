//! Task Decomposer: a single structured-output LLM call that splits a
//! research question into complementary subtasks.
//!
//! Grounded on `research/worker.rs::generate_subtopics`, which built the
//! same shape with hand-rolled JSON-parse-or-fallback logic against free
//! text; here the call goes through [`LlmClient::structured`] so the
//! fallback-to-newline-splitting path is no longer needed.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::Task;
use crate::templates::{self, TemplateStore};

pub struct Decomposer {
    llm: Arc<LlmClient>,
    templates: Arc<TemplateStore>,
}

struct PlannedTask {
    query: String,
    rationale: String,
    priority: u32,
}

impl Decomposer {
    pub fn new(llm: Arc<LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Decompose `question` into 3..=`config.research.max_tasks` subtasks,
    /// ordered by the model's priority field, and materialize them as
    /// [`Task`]s with sequential ordinals.
    pub async fn decompose(&self, question: &str, config: &Config) -> Result<Vec<Task>> {
        let vars = templates::json_vars(&[
            ("question", serde_json::json!(question)),
            ("max_tasks", serde_json::json!(config.research.max_tasks)),
        ]);
        let prompt = self.templates.render("decompose_task", &vars)?;

        let role = &config.llm.query_generation;
        let (value, _usage) = self
            .llm
            .structured(
                &role.model,
                &[ChatMessage::user(prompt)],
                "decompose_task",
                &schema(),
                role.max_tokens,
            )
            .await?;

        let mut planned = parse_tasks(&value);
        planned.sort_by_key(|t| t.priority);
        planned.truncate(config.research.max_tasks as usize);

        info!(count = planned.len(), "decomposed research question into tasks");

        Ok(planned
            .into_iter()
            .enumerate()
            .map(|(ordinal, p)| Task::new(ordinal as u32, p.query, p.rationale))
            .collect())
    }
}

fn parse_tasks(value: &serde_json::Value) -> Vec<PlannedTask> {
    value["tasks"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| {
            Some(PlannedTask {
                query: t["query"].as_str()?.to_string(),
                rationale: t["rationale"].as_str().unwrap_or_default().to_string(),
                priority: t["priority"].as_u64().unwrap_or(99) as u32,
            })
        })
        .collect()
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "rationale": {"type": "string"},
                        "priority": {"type": "integer"},
                    },
                    "required": ["query", "rationale", "priority"],
                },
            },
        },
        "required": ["tasks"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tasks_sorts_by_priority() {
        let value = serde_json::json!({
            "tasks": [
                {"query": "b", "rationale": "r2", "priority": 2},
                {"query": "a", "rationale": "r1", "priority": 1},
            ]
        });
        let mut tasks = parse_tasks(&value);
        tasks.sort_by_key(|t| t.priority);
        assert_eq!(tasks[0].query, "a");
        assert_eq!(tasks[1].query, "b");
    }

    #[test]
    fn parse_tasks_skips_entries_missing_query() {
        let value = serde_json::json!({
            "tasks": [
                {"rationale": "no query field", "priority": 1},
                {"query": "valid", "rationale": "r", "priority": 2},
            ]
        });
        let tasks = parse_tasks(&value);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].query, "valid");
    }
}
