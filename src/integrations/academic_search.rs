//! Semantic Scholar academic search: papers, authors, and citation counts.
//! Useful for the "technical analysis" pathway in speculative/hypothesis
//! style research questions.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["study", "research paper", "journal", "academic", "peer-reviewed", "preprint", "citation"];

pub struct AcademicSearchIntegration {
    ctx: IntegrationContext,
}

impl AcademicSearchIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for AcademicSearchIntegration {
    fn name(&self) -> &'static str {
        "academic_search"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "academic_search".to_string(),
            description: "Semantic Scholar academic paper search, searchable by free-text query \
                           and publication year range."
                .to_string(),
            categories: vec!["academic".to_string(), "research".to_string()],
            requires_credential: false,
            rate_limit_hint: "100 requests/5 minutes unauthenticated".to_string(),
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        keyword_overlap(question, KEYWORDS)
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "year_from": {"type": "integer"},
                "year_to": {"type": "integer"},
            },
            "required": ["query"],
        });
        generate_query_plan(
            &self.ctx,
            "academic_search",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let query = plan.params["query"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("academic_search", IntegrationErrorKind::SchemaMismatch, "missing query"))?;

        let mut params = vec![
            ("query".to_string(), query.to_string()),
            ("limit".to_string(), limit.to_string()),
            ("fields".to_string(), "title,abstract,url,year,authors".to_string()),
        ];
        if let (Some(from), Some(to)) = (plan.params["year_from"].as_i64(), plan.params["year_to"].as_i64()) {
            params.push(("year".to_string(), format!("{from}-{to}")));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(
            &self.ctx,
            "academic_search",
            "https://api.semanticscholar.org/graph/v1/paper/search",
            &params_ref,
        )
        .await?;

        let items = body["data"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["url"].as_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["abstract"].as_str().unwrap_or_default().to_string(),
                    source_name: "academic_search".to_string(),
                    domain: "semanticscholar.org".to_string(),
                    fetched_at: Utc::now(),
                    metadata: item.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
