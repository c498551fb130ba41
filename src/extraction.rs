//! Entity & Claim Extractor: one structured-output call per task over its
//! accumulated evidence, producing entities and claims grounded in specific
//! results, plus exact-match entity merging across tasks.
//!
//! Grounded on `research/aggregator.rs::Aggregator::aggregate`'s pattern of
//! folding several workers' outputs into one shared structure, generalized
//! from string concatenation to typed entity/claim merge with provenance
//! recomputation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::config::RoleModelConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{Claim, Entity, EntityType, PredicateTier, RawResult, RiskLevel, Task};
use crate::templates::{self, TemplateStore};

pub struct Extractor {
    llm: Arc<LlmClient>,
    templates: Arc<TemplateStore>,
}

impl Extractor {
    pub fn new(llm: Arc<LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Extract entities and claims from `task`'s accumulated evidence,
    /// recompute claim provenance against the evidence actually present,
    /// and drop claims that reference evidence ids the task never
    /// gathered (see [`validate_claim_groundedness`]).
    pub async fn extract(&self, task: &Task, role: &RoleModelConfig) -> Result<(Vec<Entity>, Vec<Claim>)> {
        if task.accumulated_results().is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let rendered_evidence: Vec<serde_json::Value> = task
            .accumulated_results()
            .iter()
            .map(|r| serde_json::json!({"url": r.url, "title": r.title, "snippet_text": r.snippet_text}))
            .collect();

        let vars = templates::json_vars(&[
            ("task_query", serde_json::json!(task.query)),
            ("evidence", serde_json::json!(rendered_evidence)),
        ]);
        let prompt = self.templates.render("extract_entities_claims", &vars)?;

        let (value, _usage) = self
            .llm
            .structured(&role.model, &[ChatMessage::user(prompt)], "extract_entities_claims", &schema(), role.max_tokens)
            .await?;

        let results_by_url: HashMap<String, RawResult> = task
            .accumulated_results()
            .iter()
            .map(|r| (r.url.clone(), r.clone()))
            .collect();

        let entities = parse_entities(&value, &results_by_url);
        let entities_by_name: HashMap<&str, Uuid> = entities.iter().map(|e| (e.canonical_name.as_str(), e.id)).collect();
        let mut claims = parse_claims(&value, &entities_by_name);

        for claim in &mut claims {
            claim.compute_provenance(&results_by_url);
        }

        let claims = validate_claim_groundedness(claims, &results_by_url);

        Ok((entities, claims))
    }
}

/// Exact-canonical-name merge of entities collected across multiple tasks.
/// Two entities merge only when `canonical_name` matches byte-for-byte
/// (case-sensitive); anything looser is left unmerged and flagged
/// `RiskLevel::High` so a human reader notices the possible duplicate,
/// per the engine design's stance that over-merging is worse than
/// under-merging. Aliases accumulate across merges.
pub fn merge_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut by_name: HashMap<String, Entity> = HashMap::new();

    for entity in entities {
        match by_name.get_mut(&entity.canonical_name) {
            Some(existing) => {
                for alias in entity.aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
                existing.llm_confidence = existing.llm_confidence.max(entity.llm_confidence);
                if existing.entity_type != entity.entity_type {
                    existing.disambiguation_risk = RiskLevel::High;
                    warn!(
                        name = %existing.canonical_name,
                        "merged entities disagree on entity_type, flagging high disambiguation risk"
                    );
                }
            }
            None => {
                by_name.insert(entity.canonical_name.clone(), entity);
            }
        }
    }

    by_name.into_values().collect()
}

/// Drop any claim whose `evidence_ids` do not all resolve against
/// `results_by_url` — an ungrounded claim is worse than a missing one.
/// `source_count` is recomputed separately by
/// [`Claim::compute_provenance`]; this only filters.
pub fn validate_claim_groundedness(claims: Vec<Claim>, results_by_url: &HashMap<String, RawResult>) -> Vec<Claim> {
    claims
        .into_iter()
        .filter(|claim| {
            if claim.evidence_ids.is_empty() {
                warn!(claim_id = %claim.id, "dropping claim with no evidence ids");
                return false;
            }
            let grounded = claim.evidence_ids.iter().all(|id| results_by_url.contains_key(id));
            if !grounded {
                warn!(claim_id = %claim.id, "dropping claim referencing unresolvable evidence id");
            }
            grounded
        })
        .collect()
}

fn parse_entities(value: &serde_json::Value, results_by_url: &HashMap<String, RawResult>) -> Vec<Entity> {
    value["entities"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| {
            let canonical_name = e["canonical_name"].as_str()?.to_string();
            let entity_type = parse_entity_type(e["entity_type"].as_str().unwrap_or("concept"));
            let first_seen_evidence_id = e["first_seen_evidence_id"].as_str().unwrap_or_default().to_string();
            if !results_by_url.contains_key(&first_seen_evidence_id) {
                warn!(name = %canonical_name, "entity's first_seen_evidence_id does not resolve, dropping");
                return None;
            }
            Some(Entity {
                id: Uuid::new_v4(),
                canonical_name,
                entity_type,
                aliases: e["aliases"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect(),
                first_seen_evidence_id,
                disambiguation_risk: RiskLevel::Low,
                llm_confidence: e["llm_confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
            })
        })
        .collect()
}

fn parse_claims(value: &serde_json::Value, entities_by_name: &HashMap<&str, Uuid>) -> Vec<Claim> {
    value["claims"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| {
            let subject_name = c["subject_entity"].as_str()?;
            let subject_entity_id = *entities_by_name.get(subject_name)?;
            let object_entity_id = c["object_entity"].as_str().and_then(|name| entities_by_name.get(name).copied());

            Some(Claim {
                id: Uuid::new_v4(),
                subject_entity_id,
                predicate: c["predicate"].as_str().unwrap_or_default().to_string(),
                object_entity_id,
                object_literal: c["object_literal"].as_str().map(|s| s.to_string()),
                predicate_tier: parse_predicate_tier(c["predicate_tier"].as_str().unwrap_or("weak")),
                evidence_ids: c["evidence_ids"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect(),
                source_count: 0,
                domain_diversity: 0,
                llm_confidence: c["llm_confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
            })
        })
        .collect()
}

fn parse_entity_type(raw: &str) -> EntityType {
    match raw {
        "person" => EntityType::Person,
        "organization" => EntityType::Organization,
        "program" => EntityType::Program,
        "location" => EntityType::Location,
        _ => EntityType::Concept,
    }
}

fn parse_predicate_tier(raw: &str) -> PredicateTier {
    match raw {
        "strong" => PredicateTier::Strong,
        "meta" => PredicateTier::Meta,
        _ => PredicateTier::Weak,
    }
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "canonical_name": {"type": "string"},
                        "entity_type": {"type": "string"},
                        "aliases": {"type": "array", "items": {"type": "string"}},
                        "first_seen_evidence_id": {"type": "string"},
                        "llm_confidence": {"type": "number"},
                    },
                    "required": ["canonical_name", "entity_type", "first_seen_evidence_id"],
                },
            },
            "claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "subject_entity": {"type": "string"},
                        "predicate": {"type": "string"},
                        "object_entity": {"type": ["string", "null"]},
                        "object_literal": {"type": ["string", "null"]},
                        "predicate_tier": {"type": "string"},
                        "evidence_ids": {"type": "array", "items": {"type": "string"}},
                        "llm_confidence": {"type": "number"},
                    },
                    "required": ["subject_entity", "predicate", "predicate_tier", "evidence_ids"],
                },
            },
        },
        "required": ["entities", "claims"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(url: &str, source: &str, domain: &str) -> RawResult {
        RawResult {
            url: url.to_string(),
            title: "t".to_string(),
            snippet_text: "s".to_string(),
            source_name: source.to_string(),
            domain: domain.to_string(),
            fetched_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn validate_claim_groundedness_drops_claims_referencing_unknown_evidence() {
        let results_by_url: HashMap<String, RawResult> = [("https://a/1".to_string(), sample("https://a/1", "s", "a.com"))].into();
        let grounded = Claim {
            id: Uuid::new_v4(),
            subject_entity_id: Uuid::new_v4(),
            predicate: "p".to_string(),
            object_entity_id: None,
            object_literal: None,
            predicate_tier: PredicateTier::Strong,
            evidence_ids: vec!["https://a/1".to_string()],
            source_count: 0,
            domain_diversity: 0,
            llm_confidence: 0.9,
        };
        let mut ungrounded = grounded.clone();
        ungrounded.id = Uuid::new_v4();
        ungrounded.evidence_ids = vec!["https://nope/1".to_string()];

        let kept = validate_claim_groundedness(vec![grounded.clone(), ungrounded], &results_by_url);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, grounded.id);
    }

    #[test]
    fn validate_claim_groundedness_drops_claims_with_no_evidence() {
        let claim = Claim {
            id: Uuid::new_v4(),
            subject_entity_id: Uuid::new_v4(),
            predicate: "p".to_string(),
            object_entity_id: None,
            object_literal: None,
            predicate_tier: PredicateTier::Weak,
            evidence_ids: vec![],
            source_count: 0,
            domain_diversity: 0,
            llm_confidence: 0.5,
        };
        assert!(validate_claim_groundedness(vec![claim], &HashMap::new()).is_empty());
    }

    #[test]
    fn merge_entities_combines_aliases_for_exact_name_match() {
        let a = Entity {
            id: Uuid::new_v4(),
            canonical_name: "Acme Corp".to_string(),
            entity_type: EntityType::Organization,
            aliases: vec!["Acme".to_string()],
            first_seen_evidence_id: "https://a/1".to_string(),
            disambiguation_risk: RiskLevel::Low,
            llm_confidence: 0.7,
        };
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        b.aliases = vec!["Acme Inc.".to_string()];
        b.llm_confidence = 0.9;

        let merged = merge_entities(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].aliases.len(), 2);
        assert_eq!(merged[0].llm_confidence, 0.9);
    }

    #[test]
    fn merge_entities_flags_high_risk_on_conflicting_entity_type() {
        let a = Entity {
            id: Uuid::new_v4(),
            canonical_name: "Athena".to_string(),
            entity_type: EntityType::Program,
            aliases: vec![],
            first_seen_evidence_id: "https://a/1".to_string(),
            disambiguation_risk: RiskLevel::Low,
            llm_confidence: 0.5,
        };
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        b.entity_type = EntityType::Person;

        let merged = merge_entities(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].disambiguation_risk, RiskLevel::High);
    }
}
