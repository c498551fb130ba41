//! SAM.gov contract opportunities: federal procurement notices. Its query
//! shape needs a posted-date range, unlike the job-board sources — the
//! motivating example from the engine design for why query generation is
//! per-source rather than a single shared shape.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["contract", "contractor", "procurement", "solicitation", "rfp", "award"];

pub struct ContractsSamIntegration {
    ctx: IntegrationContext,
}

impl ContractsSamIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for ContractsSamIntegration {
    fn name(&self) -> &'static str {
        "contracts_sam"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "contracts_sam".to_string(),
            description: "SAM.gov federal contract opportunities and awards, searchable by \
                           keyword and posted-date range."
                .to_string(),
            categories: vec!["procurement".to_string(), "government".to_string()],
            requires_credential: true,
            rate_limit_hint: "1,000 requests/day per API key".to_string(),
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
                "posted_from": {"type": "string", "description": "MM/dd/yyyy"},
                "posted_to": {"type": "string", "description": "MM/dd/yyyy"},
                "naics_code": {"type": "string"},
            },
            "required": ["keywords", "posted_from", "posted_to"],
        });
        generate_query_plan(
            &self.ctx,
            "contracts_sam",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let keywords = plan.params["keywords"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("contracts_sam", IntegrationErrorKind::SchemaMismatch, "missing keywords"))?;
        let posted_from = plan.params["posted_from"].as_str().unwrap_or("");
        let posted_to = plan.params["posted_to"].as_str().unwrap_or("");

        let mut params = vec![
            ("title".to_string(), keywords.to_string()),
            ("postedFrom".to_string(), posted_from.to_string()),
            ("postedTo".to_string(), posted_to.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(naics) = plan.params["naics_code"].as_str() {
            params.push(("ncode".to_string(), naics.to_string()));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "contracts_sam", "https://api.sam.gov/opportunities/v2/search", &params_ref).await?;

        let items = body["opportunitiesData"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["uiLink"].as_str()?.to_string();
                let domain = url::Url::parse(&url).ok()?.host_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["description"].as_str().unwrap_or_default().to_string(),
                    source_name: "contracts_sam".to_string(),
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
