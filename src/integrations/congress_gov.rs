//! Congress.gov: bills, resolutions, and member activity. Relevant to
//! questions about legislation, sponsors, and committee action.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["bill", "legislation", "congress", "senate", "house of representatives", "sponsor", "committee"];

pub struct CongressGovIntegration {
    ctx: IntegrationContext,
}

impl CongressGovIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for CongressGovIntegration {
    fn name(&self) -> &'static str {
        "congress_gov"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "congress_gov".to_string(),
            description: "Congress.gov bills, resolutions, and sponsor/committee activity, \
                           searchable by keyword and congress session."
                .to_string(),
            categories: vec!["legislation".to_string(), "government".to_string()],
            requires_credential: true,
            rate_limit_hint: "5,000 requests/hour per API key".to_string(),
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
                "congress": {"type": "integer", "description": "e.g. 118"},
                "bill_type": {"type": "string", "enum": ["hr", "s", "hres", "sres", "any"]},
            },
            "required": ["query"],
        });
        generate_query_plan(
            &self.ctx,
            "congress_gov",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let query = plan.params["query"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("congress_gov", IntegrationErrorKind::SchemaMismatch, "missing query"))?;

        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(congress) = plan.params["congress"].as_i64() {
            params.push(("congress".to_string(), congress.to_string()));
        }
        if let Some(bill_type) = plan.params["bill_type"].as_str().filter(|t| *t != "any") {
            params.push(("billType".to_string(), bill_type.to_string()));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "congress_gov", "https://api.congress.gov/v3/bill", &params_ref).await?;

        let items = body["bills"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["url"].as_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["latestAction"]["text"].as_str().unwrap_or_default().to_string(),
                    source_name: "congress_gov".to_string(),
                    domain: "congress.gov".to_string(),
                    fetched_at: Utc::now(),
                    metadata: item.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
