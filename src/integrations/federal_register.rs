//! The Federal Register: rules, proposed rules, and notices published by
//! federal agencies. Public, unauthenticated API — no credential required,
//! unlike most of the other sources.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["regulation", "rule", "rulemaking", "federal register", "agency notice", "policy"];

pub struct FederalRegisterIntegration {
    ctx: IntegrationContext,
}

impl FederalRegisterIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for FederalRegisterIntegration {
    fn name(&self) -> &'static str {
        "federal_register"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "federal_register".to_string(),
            description: "FederalRegister.gov: rules, proposed rules, and notices published by \
                           federal agencies, searchable by keyword and agency."
                .to_string(),
            categories: vec!["regulation".to_string(), "government".to_string()],
            requires_credential: false,
            rate_limit_hint: "public API, no key required, fair-use throttling".to_string(),
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        keyword_overlap(question, KEYWORDS)
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "terms": {"type": "string"},
                "agency": {"type": "string"},
                "document_type": {
                    "type": "string",
                    "enum": ["rule", "proposed_rule", "notice", "any"],
                },
            },
            "required": ["terms"],
        });
        generate_query_plan(
            &self.ctx,
            "federal_register",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let terms = plan.params["terms"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("federal_register", IntegrationErrorKind::SchemaMismatch, "missing terms"))?;

        let mut params = vec![
            ("conditions[term]".to_string(), terms.to_string()),
            ("per_page".to_string(), limit.to_string()),
        ];
        if let Some(agency) = plan.params["agency"].as_str() {
            params.push(("conditions[agencies][]".to_string(), agency.to_string()));
        }
        if let Some(doc_type) = plan.params["document_type"].as_str().filter(|t| *t != "any") {
            params.push(("conditions[type][]".to_string(), doc_type.to_string()));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(
            &self.ctx,
            "federal_register",
            "https://www.federalregister.gov/api/v1/documents.json",
            &params_ref,
        )
        .await?;

        let items = body["results"].as_array().cloned().unwrap_or_default();

        let results = items
            .into_iter()
            .filter_map(|item| {
                let url = item["html_url"].as_str()?.to_string();
                Some(RawResult {
                    url,
                    title: item["title"].as_str().unwrap_or_default().to_string(),
                    snippet_text: item["abstract"].as_str().unwrap_or_default().to_string(),
                    source_name: "federal_register".to_string(),
                    domain: "federalregister.gov".to_string(),
                    fetched_at: Utc::now(),
                    metadata: item.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
