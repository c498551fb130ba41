//! Integration tests exercising the engine's core invariants directly
//! against the public data model, independent of any LLM or HTTP call —
//! the orchestration-level scenarios these mirror (accumulation across
//! retry, per-item relevance filtering, claim groundedness) are also
//! covered at the unit level inside `accumulator`, `relevance`, and
//! `extraction`; these tests pin the same invariants from outside the
//! crate, against the types a caller embedding the engine would actually
//! touch.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use deep_research_engine::model::{
    Claim, Entity, EntityType, PredicateTier, RawResult, RelevanceEvaluation, RiskLevel, Task,
};
use deep_research_engine::templates::TemplateStore;
use uuid::Uuid;

/// Every template name a pipeline stage renders by name, kept in sync with
/// `templates::REQUIRED_TEMPLATES`.
const REQUIRED_TEMPLATES: &[&str] = &[
    "decompose_task",
    "generate_query",
    "reformulate_query",
    "relevance_filter",
    "generate_hypotheses",
    "extract_entities_claims",
    "synthesize_report",
];

/// Property 8 (template completeness): the templates shipped with the
/// crate must cover every name a pipeline stage renders by, and loading
/// them must not silently drop any.
#[test]
fn shipped_templates_directory_satisfies_every_required_template() {
    let store = TemplateStore::load("templates").expect("shipped templates/ directory must load");
    for required in REQUIRED_TEMPLATES {
        assert!(
            store.names().any(|n| n == *required),
            "shipped templates/ directory is missing required template '{required}'"
        );
    }
}

fn result(url: &str, source: &str, domain: &str) -> RawResult {
    RawResult {
        url: url.to_string(),
        title: format!("title for {url}"),
        snippet_text: "snippet".to_string(),
        source_name: source.to_string(),
        domain: domain.to_string(),
        fetched_at: Utc::now(),
        metadata: serde_json::json!({}),
    }
}

/// E6: attempt 1 yields 2 relevant results, attempt 2 yields 3 more with
/// disjoint URLs. The task must end up with all 5, and attempt 1's
/// results must still be present after attempt 2's accumulate call.
#[test]
fn accumulation_across_retry_keeps_earlier_results_and_grows_monotonically() {
    let mut task = Task::new(0, "publicly disclosed federal whistleblower programs", "why");

    let attempt_one = vec![result("https://a.gov/1", "federal_register", "a.gov"), result("https://a.gov/2", "federal_register", "a.gov")];
    let added_first = task.accumulate(attempt_one.clone());
    assert_eq!(added_first, 2);
    assert_eq!(task.accumulated_results().len(), 2);

    let attempt_two = vec![
        result("https://b.gov/1", "congress_gov", "b.gov"),
        result("https://b.gov/2", "congress_gov", "b.gov"),
        result("https://b.gov/3", "congress_gov", "b.gov"),
    ];
    let added_second = task.accumulate(attempt_two);
    assert_eq!(added_second, 3);
    assert_eq!(task.accumulated_results().len(), 5);

    for original in &attempt_one {
        assert!(task.accumulated_results().iter().any(|r| r.url == original.url), "attempt 1 result {} was lost", original.url);
    }
}

/// Property 2 (URL uniqueness): re-accumulating overlapping URLs must not
/// grow the set or duplicate entries.
#[test]
fn accumulate_deduplicates_by_url_across_overlapping_batches() {
    let mut task = Task::new(0, "q", "r");
    task.accumulate(vec![result("https://x.com/1", "web_search", "x.com")]);
    let added = task.accumulate(vec![
        result("https://x.com/1", "web_search", "x.com"),
        result("https://x.com/2", "web_search", "x.com"),
    ]);
    assert_eq!(added, 1);
    assert_eq!(task.accumulated_results().len(), 2);

    let mut seen = std::collections::HashSet::new();
    for r in task.accumulated_results() {
        assert!(seen.insert(r.url.clone()), "duplicate url {}", r.url);
    }
}

/// E3: a batch of 10 results where only 2 are relevant. The filter must
/// keep exactly those 2 regardless of how off-topic the rest of the batch
/// is, and every item's score must still be recorded for transparency.
#[test]
fn relevance_filter_keeps_only_flagged_items_from_a_mostly_off_topic_batch() {
    let batch: Vec<RawResult> = (0..10).map(|i| result(&format!("https://x.com/{i}"), "web_search", "x.com")).collect();

    let evaluation = RelevanceEvaluation {
        relevant_indices: BTreeSet::from([3, 8]),
        scores: vec![1, 0, 2, 9, 0, 1, 0, 2, 8, 1],
        off_topic_reason: Some("most results concerned an unrelated program".to_string()),
        reformulation_hint: Some("narrow the query to the specific agency".to_string()),
    };

    let kept = evaluation.keep(&batch);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].url, "https://x.com/3");
    assert_eq!(kept[1].url, "https://x.com/8");
    assert_eq!(evaluation.scores.len(), batch.len());
}

/// Property 4 + 5: claim groundedness and source-count correctness.
/// `compute_provenance` must derive `source_count`/`domain_diversity` from
/// the actual evidence set, never from an LLM-reported number.
#[test]
fn claim_provenance_is_recomputed_from_evidence_not_trusted_from_input() {
    let results_by_url: HashMap<String, RawResult> = [
        (
            "https://a.gov/1".to_string(),
            result("https://a.gov/1", "federal_register", "a.gov"),
        ),
        (
            "https://b.org/1".to_string(),
            result("https://b.org/1", "news_search", "b.org"),
        ),
    ]
    .into_iter()
    .collect();

    let mut claim = Claim {
        id: Uuid::new_v4(),
        subject_entity_id: Uuid::new_v4(),
        predicate: "received_funding_from".to_string(),
        object_entity_id: None,
        object_literal: Some("Example Program".to_string()),
        predicate_tier: PredicateTier::Strong,
        evidence_ids: vec!["https://a.gov/1".to_string(), "https://b.org/1".to_string()],
        // Deliberately wrong, to prove compute_provenance overwrites rather than trusts these.
        source_count: 99,
        domain_diversity: 99,
        llm_confidence: 0.8,
    };

    claim.compute_provenance(&results_by_url);
    assert_eq!(claim.source_count, 2);
    assert_eq!(claim.domain_diversity, 2);
}

#[test]
fn entity_disambiguation_risk_defaults_low_for_freshly_extracted_entities() {
    let entity = Entity {
        id: Uuid::new_v4(),
        canonical_name: "Example Agency".to_string(),
        entity_type: EntityType::Organization,
        aliases: vec![],
        first_seen_evidence_id: "https://a.gov/1".to_string(),
        disambiguation_risk: RiskLevel::Low,
        llm_confidence: 0.6,
    };
    assert_eq!(entity.disambiguation_risk, RiskLevel::Low);
}
