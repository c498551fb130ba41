//! USPTO PatentsView: granted patents and applications, searchable by
//! inventor, assignee, and full-text query.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["patent", "invention", "inventor", "assignee", "uspto", "intellectual property"];

pub struct UsptoPatentsIntegration {
    ctx: IntegrationContext,
}

impl UsptoPatentsIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for UsptoPatentsIntegration {
    fn name(&self) -> &'static str {
        "uspto_patents"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "uspto_patents".to_string(),
            description: "USPTO PatentsView granted patents and applications, searchable by \
                           full-text query, inventor, and assignee."
                .to_string(),
            categories: vec!["intellectual_property".to_string(), "government".to_string()],
            requires_credential: true,
            rate_limit_hint: "45 requests/minute per API key".to_string(),
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        keyword_overlap(question, KEYWORDS)
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "text_query": {"type": "string"},
                "assignee": {"type": "string"},
                "inventor": {"type": "string"},
            },
            "required": ["text_query"],
        });
        generate_query_plan(
            &self.ctx,
            "uspto_patents",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let text_query = plan.params["text_query"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("uspto_patents", IntegrationErrorKind::SchemaMismatch, "missing text_query"))?;

        let mut query_parts = vec![format!("_text_any:\"{text_query}\"")];
        if let Some(assignee) = plan.params["assignee"].as_str() {
            query_parts.push(format!("assignee_organization:\"{assignee}\""));
        }
        if let Some(inventor) = plan.params["inventor"].as_str() {
            query_parts.push(format!("inventor_last_name:\"{inventor}\""));
        }

        let params = vec![
            ("q".to_string(), query_parts.join(" AND ")),
            ("per_page".to_string(), limit.to_string()),
        ];
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "uspto_patents", "https://api.patentsview.org/patents/query", &params_ref).await?;

        let items = body["patents"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let patent_number = item["patent_number"].as_str()?;
                let url = format!("https://patents.google.com/patent/US{patent_number}");
                Some(RawResult {
                    url,
                    title: item["patent_title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["patent_abstract"].as_str().unwrap_or_default().to_string(),
                    source_name: "uspto_patents".to_string(),
                    domain: "patents.google.com".to_string(),
                    fetched_at: Utc::now(),
                    metadata: item.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
