//! USAJobs.gov: the federal civilian job board. No query-gen credential is
//! needed to search, but the public API keys results behind a
//! `FEDERAL_JOBS_API_KEY` host header in production, so the integration is
//! still marked credential-required (`databases.federal_jobs.credential_env`).

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["job", "jobs", "career", "position", "hiring", "vacancy", "employment"];

pub struct FederalJobsIntegration {
    ctx: IntegrationContext,
}

impl FederalJobsIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for FederalJobsIntegration {
    fn name(&self) -> &'static str {
        "federal_jobs"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "federal_jobs".to_string(),
            description: "USAJobs.gov federal civilian job postings, searchable by keyword, \
                           agency, location, and pay grade."
                .to_string(),
            categories: vec!["employment".to_string(), "government".to_string()],
            requires_credential: true,
            rate_limit_hint: "public API, ~5 requests/second per key".to_string(),
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
                "location": {"type": "string", "description": "city, state or remote"},
                "agency": {"type": "string"},
            },
            "required": ["keywords"],
        });
        generate_query_plan(
            &self.ctx,
            "federal_jobs",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let keywords = plan.params["keywords"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("federal_jobs", IntegrationErrorKind::SchemaMismatch, "missing keywords"))?;

        let mut params = vec![("Keyword".to_string(), keywords.to_string()), ("ResultsPerPage".to_string(), limit.to_string())];
        if let Some(location) = plan.params["location"].as_str() {
            params.push(("LocationName".to_string(), location.to_string()));
        }
        if let Some(agency) = plan.params["agency"].as_str() {
            params.push(("Organization".to_string(), agency.to_string()));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "federal_jobs", "https://data.usajobs.gov/api/search", &params_ref).await?;

        let items = body["SearchResult"]["SearchResultItems"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let descriptor = &item["MatchedObjectDescriptor"];
                let url = descriptor["PositionURI"].as_str()?.to_string();
                let domain = url::Url::parse(&url).ok()?.host_str()?.to_string();
                Some(RawResult {
                    url,
                    title: descriptor["PositionTitle"].as_str().unwrap_or_default().to_string(),
                    snippet_text: descriptor["UserArea"]["Details"]["JobSummary"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    source_name: "federal_jobs".to_string(),
                    domain,
                    fetched_at: Utc::now(),
                    metadata: descriptor.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
