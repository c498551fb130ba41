//! SEC EDGAR full-text search: corporate filings (10-K, 10-Q, 8-K, S-1...).
//! Public API; SEC requires a descriptive `User-Agent` rather than an API
//! key, so this is the one source whose "credential" is a contact string
//! pulled from config rather than a secret.

use async_trait::async_trait;
use chrono::Utc;

use super::{fetch_json, generate_query_plan, keyword_overlap, IntegrationContext};
use crate::error::{IntegrationErrorKind, ResearchError, Result};
use crate::model::{QueryPlan, RawResult, SourceMetadata};

const KEYWORDS: &[&str] = &["sec filing", "10-k", "10-q", "8-k", "s-1", "prospectus", "edgar", "securities"];

pub struct SecEdgarIntegration {
    ctx: IntegrationContext,
}

impl SecEdgarIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl super::Integration for SecEdgarIntegration {
    fn name(&self) -> &'static str {
        "sec_edgar"
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: "sec_edgar".to_string(),
            description: "SEC EDGAR full-text search over corporate filings, searchable by \
                           keyword, form type, and date range."
                .to_string(),
            categories: vec!["finance".to_string(), "regulation".to_string()],
            requires_credential: true,
            rate_limit_hint: "10 requests/second, requires descriptive User-Agent".to_string(),
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        keyword_overlap(question, KEYWORDS)
    }

    async fn generate_query(&self, question: &str) -> Result<Option<QueryPlan>> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "q": {"type": "string"},
                "form_type": {"type": "string", "description": "e.g. 10-K, 8-K"},
                "date_range": {"type": "string", "description": "e.g. custom, 1y, 5y"},
            },
            "required": ["q"],
        });
        generate_query_plan(
            &self.ctx,
            "sec_edgar",
            &self.metadata().description,
            &schema,
            question,
        )
        .await
    }

    async fn execute(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<RawResult>> {
        let query = plan.params["q"]
            .as_str()
            .ok_or_else(|| ResearchError::integration("sec_edgar", IntegrationErrorKind::SchemaMismatch, "missing query"))?;

        let mut params = vec![("q".to_string(), query.to_string())];
        if let Some(form_type) = plan.params["form_type"].as_str() {
            params.push(("forms".to_string(), form_type.to_string()));
        }
        let params_ref: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        let body = fetch_json(&self.ctx, "sec_edgar", "https://efts.sec.gov/LATEST/search-index", &params_ref).await?;

        let hits = body["hits"]["hits"].as_array().cloned().unwrap_or_default();

        let results = hits
            .into_iter()
            .filter_map(|hit| {
                let source = &hit["_source"];
                let accession = hit["_id"].as_str()?;
                let url = format!("https://www.sec.gov/Archives/edgar/data/{accession}");
                Some(RawResult {
                    url,
                    title: source["display_names"][0].as_str().unwrap_or_default().to_string(),
                    snippet_text: source["file_description"].as_str().unwrap_or_default().to_string(),
                    source_name: "sec_edgar".to_string(),
                    domain: "sec.gov".to_string(),
                    fetched_at: Utc::now(),
                    metadata: source.clone(),
                })
            })
            .take(limit)
            .collect();

        Ok(results)
    }
}
