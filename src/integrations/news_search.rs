//! News article search, covering the "journalism" investigative pathway.
//! Distinguished from `web_search` by date-sortable, publication-scoped
//! results rather than general-purpose pages.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["news", "reported", "journalist", "article", "coverage", "disclosed", "leaked"];

pub struct NewsSearchIntegration {
    ctx: IntegrationContext,
}

impl NewsSearchIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for NewsSearchIntegration {
    fn name(&self) -> &'static str {
        "news_search"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "news_search".to_string(),
            description: "News article search across mainstream and trade outlets, searchable by \
                           keyword and publication date window."
                .to_string(),
            categories: vec!["journalism".to_string(), "general".to_string()],
            requires_credential: true,
            rate_limit_hint: "vendor API, 100 requests/day on free tier".to_string(),
        }
    }

    async fn is_relevant(&self, _question: &str) -> bool {
        // News is a plausible secondary source for almost any question;
        // the cheap gate here only excludes questions with zero topical
        // overlap with "something happened and was reported".
        true
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        if !keyword_overlap(question, KEYWORDS) && question.split_whitespace().count() < 3 {
            return Ok(None);
        }
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "from_date": {"type": "string", "description": "yyyy-MM-dd"},
                "sort_by": {"type": "string", "enum": ["relevancy", "publishedAt"]},
            },
            "required": ["query"],
        });
        generate_query_plan(
            &self.ctx,
            "news_search",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let query = plan.params["query"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("news_search", IntegrationErrorKind::SchemaMismatch, "missing query"))?;

        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("pageSize".to_string(), limit.to_string()),
        ];
        if let Some(from_date) = plan.params["from_date"].as_str() {
            params.push(("from".to_string(), from_date.to_string()));
        }
        params.push((
            "sortBy".to_string(),
            plan.params["sort_by"].as_str().unwrap_or("relevancy").to_string(),
        ));
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "news_search", "https://newsapi.org/v2/everything", &params_ref).await?;

        let items = body["articles"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["url"].as_str()?.to_string();
                let domain = url::Url::parse(&url).ok()?.host_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["description"].as_str().unwrap_or_default().to_string(),
                    source_name: "news_search".to_string(),
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
