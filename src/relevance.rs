//! Relevance Filter: a single structured-output LLM call per batch of
//! candidate results, scoring every item and returning which indices
//! actually address the subtask.
//!
//! The key invariant this module exists to protect — called out directly in
//! `spec.md` §4.8 as "derived from a real bug in the source" — is that a
//! mostly-off-topic batch must still keep its few on-topic items. Nothing
//! downstream is allowed to see `batch` directly; everything goes through
//! [`RelevanceEvaluation::keep`].

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RoleModelConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{RawResult, RelevanceEvaluation};
use crate::templates::{self, TemplateStore};

pub struct RelevanceFilter {
    llm: Arc<LlmClient>,
    templates: Arc<TemplateStore>,
}

impl RelevanceFilter {
    pub fn new(llm: Arc<LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Score `batch` against `task_query` and return the full evaluation —
    /// both the indices to keep and the score distribution for every item,
    /// per `spec.md`'s "store alongside for transparency" requirement.
    pub async fn evaluate(
        &self,
        task_query: &str,
        batch: &[RawResult],
        role: &RoleModelConfig,
    ) -> Result<RelevanceEvaluation> {
        if batch.is_empty() {
            return Ok(RelevanceEvaluation {
                relevant_indices: BTreeSet::new(),
                scores: Vec::new(),
                off_topic_reason: None,
                reformulation_hint: None,
            });
        }

        let rendered_results: Vec<serde_json::Value> = batch
            .iter()
            .enumerate()
            .map(|(i, r)| serde_json::json!(format!("{i}: {} — {}", r.title, r.snippet_text)))
            .collect();

        let vars = templates::json_vars(&[
            ("task_query", serde_json::json!(task_query)),
            ("results", serde_json::json!(rendered_results)),
        ]);
        let prompt = self.templates.render("relevance_filter", &vars)?;

        let (value, _usage) = self
            .llm
            .structured(&role.model, &[ChatMessage::user(prompt)], "relevance_filter", &schema(), role.max_tokens)
            .await?;

        Ok(parse_evaluation(&value, batch.len()))
    }
}

fn parse_evaluation(value: &serde_json::Value, batch_len: usize) -> RelevanceEvaluation {
    let relevant_indices: BTreeSet<usize> = value["relevant_indices"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_u64())
        .map(|v| v as usize)
        .filter(|&i| i < batch_len)
        .collect();

    let mut scores: Vec<u8> = value["scores"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_u64())
        .map(|v| v.min(10) as u8)
        .collect();
    scores.resize(batch_len, 0);

    RelevanceEvaluation {
        relevant_indices,
        scores,
        off_topic_reason: value["off_topic_reason"].as_str().map(|s| s.to_string()),
        reformulation_hint: value["reformulation_hint"].as_str().map(|s| s.to_string()),
    }
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "relevant_indices": {"type": "array", "items": {"type": "integer"}},
            "scores": {"type": "array", "items": {"type": "integer"}},
            "off_topic_reason": {"type": ["string", "null"]},
            "reformulation_hint": {"type": ["string", "null"]},
        },
        "required": ["relevant_indices", "scores"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_result(url: &str) -> RawResult {
        RawResult {
            url: url.to_string(),
            title: "title".to_string(),
            snippet_text: "snippet".to_string(),
            source_name: "web_search".to_string(),
            domain: "example.com".to_string(),
            fetched_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn keeps_only_the_subset_flagged_relevant_even_when_most_are_off_topic() {
        let batch: Vec<RawResult> = (0..10).map(|i| sample_result(&format!("https://x.com/{i}"))).collect();
        let value = serde_json::json!({
            "relevant_indices": [2, 7],
            "scores": [0,0,8,0,0,0,0,9,0,0],
            "off_topic_reason": "most results were about a different topic",
            "reformulation_hint": null,
        });
        let evaluation = parse_evaluation(&value, batch.len());
        let kept = evaluation.keep(&batch);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].url, "https://x.com/2");
        assert_eq!(kept[1].url, "https://x.com/7");
        assert_eq!(evaluation.scores.len(), 10);
    }

    #[test]
    fn out_of_range_indices_are_dropped_rather_than_panicking() {
        let batch: Vec<RawResult> = vec![sample_result("https://x.com/0")];
        let value = serde_json::json!({
            "relevant_indices": [0, 5],
            "scores": [9],
        });
        let evaluation = parse_evaluation(&value, batch.len());
        assert_eq!(evaluation.relevant_indices.len(), 1);
        assert_eq!(evaluation.keep(&batch).len(), 1);
    }

    #[test]
    fn empty_batch_short_circuits_without_flagging_relevance() {
        let evaluation = parse_evaluation(&serde_json::json!({"relevant_indices": [], "scores": []}), 0);
        assert!(evaluation.relevant_indices.is_empty());
        assert!(evaluation.scores.is_empty());
    }
}
