//! General-purpose web search. The catch-all integration: always relevant,
//! used when no more specific source applies, and the default for E1's
//! trivial factual query.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

pub struct WebSearchIntegration {
    ctx: IntegrationContext,
}

impl WebSearchIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for WebSearchIntegration {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "web_search".to_string(),
            description: "General-purpose web search, the default source when no more \
                           specific integration applies."
                .to_string(),
            categories: vec!["general".to_string()],
            requires_credential: true,
            rate_limit_hint: "vendor API, ~10 requests/second".to_string(),
        }
    }

    async fn is_relevant(&self, _question: &str) -> bool {
        // Always a candidate: this is the fallback source.
        true
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "site_restrict": {"type": "string", "description": "optional site: filter"},
            },
            "required": ["query"],
        });
        generate_query_plan(
            &self.ctx,
            "web_search",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let query = plan.params["query"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("web_search", IntegrationErrorKind::SchemaMismatch, "missing query"))?;

        let full_query = match plan.params["site_restrict"].as_str() {
            Some(site) => format!("{query} site:{site}"),
            None => query.to_string(),
        };

        let params = vec![
            ("q".to_string(), full_query),
            ("count".to_string(), limit.to_string()),
        ];
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "web_search", "https://api.search.brave.com/res/v1/web/search", &params_ref).await?;

        let items = body["web"]["results"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["url"].as_str()?.to_string();
                let domain = url::Url::parse(&url).ok()?.host_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["description"].as_str().unwrap_or_default().to_string(),
                    source_name: "web_search".to_string(),
                    domain,
                    fetched_at: Utc::now(),
                    metadata: item.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
