//! ClearedJobs.net-style listings for security-cleared defense contractor
//! positions. Distinct from `federal_jobs` because cleared postings carry a
//! clearance-level facet the civilian board doesn't have (E2's motivating
//! example: "federal cybersecurity analyst positions").

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &[
    "cleared", "clearance", "secret", "top secret", "ts/sci", "defense contractor", "cybersecurity",
];

pub struct ClearedJobsIntegration {
    ctx: IntegrationContext,
}

impl ClearedJobsIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for ClearedJobsIntegration {
    fn name(&self) -> &'static str {
        "cleared_jobs"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "cleared_jobs".to_string(),
            description: "Security-cleared defense contractor job postings, searchable by \
                           keyword, clearance level, and location."
                .to_string(),
            categories: vec!["employment".to_string(), "defense".to_string()],
            requires_credential: true,
            rate_limit_hint: "vendor API, ~60 requests/minute".to_string(),
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        keyword_overlap(question, KEYWORDS)
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "keywords": {"type": "string"},
                "clearance_level": {
                    "type": "string",
                    "enum": ["public_trust", "secret", "top_secret", "ts_sci", "any"],
                },
                "location": {"type": "string"},
            },
            "required": ["keywords", "clearance_level"],
        });
        generate_query_plan(
            &self.ctx,
            "cleared_jobs",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let keywords = plan.params["keywords"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("cleared_jobs", IntegrationErrorKind::SchemaMismatch, "missing keywords"))?;
        let clearance = plan.params["clearance_level"].as_str().unwrap_or("any");

        let mut params = vec![
            ("q".to_string(), keywords.to_string()),
            ("clearance".to_string(), clearance.to_string()),
            ("per_page".to_string(), limit.to_string()),
        ];
        if let Some(location) = plan.params["location"].as_str() {
            params.push(("location".to_string(), location.to_string()));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "cleared_jobs", "https://api.clearedjobs.example/v1/search", &params_ref).await?;

        let items = body["results"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["url"].as_str()?.to_string();
                let domain = url::Url::parse(&url).ok()?.host_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["description"].as_str().unwrap_or_default().to_string(),
                    source_name: "cleared_jobs".to_string(),
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
