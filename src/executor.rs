//! Parallel Executor: runs the relevance → query-gen → execute pipeline for
//! a set of selected integrations concurrently, gated by a semaphore.
//!
//! Grounded on `research/worker.rs::ResearchOrchestrator::execute`'s
//! `tokio::spawn` + `Arc<Semaphore>` + `join_all` fan-out, generalized from
//! "one LLM call per worker" to "one three-phase integration pipeline per
//! source".

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::ResearchError;
use crate::integrations::Integration;
use crate::model::RawResult;

/// Either a source's normalized results or the error it failed with — the
/// executor surfaces failures rather than silently dropping the source, per
/// `spec.md` §4.5 ("the caller decides whether to retry").
pub enum SourceOutcome {
    Results(Vec<RawResult>),
    Skipped,
    Failed(ResearchError),
}

pub struct ParallelExecutor {
    semaphore: Arc<Semaphore>,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run the three-phase pipeline for every integration in `sources`
    /// concurrently with respect to each other; within a single source the
    /// three phases run in order. No shared mutable state between sources —
    /// each task owns its own `Arc<dyn Integration>` clone and result slot.
    pub async fn run(
        &self,
        question: &str,
        sources: Vec<Arc<dyn Integration>>,
        limit_per_source: usize,
    ) -> HashMap<String, SourceOutcome> {
        let mut handles = Vec::new();

        for integration in sources {
            let semaphore = self.semaphore.clone();
            let question = question.to_string();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("executor semaphore closed");
                let source_name = integration.metadata().name;

                if !integration.is_relevant(&question).await {
                    info!(source = %source_name, "source skipped: not relevant");
                    return (source_name, SourceOutcome::Skipped);
                }

                let plan = match integration.generate_query(&question).await {
                    Ok(Some(plan)) => plan,
                    Ok(None) => {
                        info!(source = %source_name, "source skipped: declined to generate a query");
                        return (source_name, SourceOutcome::Skipped);
                    }
                    Err(err) => {
                        warn!(source = %source_name, %err, "query generation failed");
                        return (source_name, SourceOutcome::Failed(err));
                    }
                };

                match integration.execute(&plan, limit_per_source).await {
                    Ok(results) => {
                        info!(source = %source_name, count = results.len(), "source returned results");
                        (source_name, SourceOutcome::Results(results))
                    }
                    Err(err) => {
                        warn!(source = %source_name, %err, "source execution failed");
                        (source_name, SourceOutcome::Failed(err))
                    }
                }
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.ok())
            .collect()
    }
}

/// Merge every source's results into one ordered batch, deterministically
/// sorted by `(source_name, url)` per `spec.md` §5's ordering guarantee —
/// results may arrive from sources in any order but the merged batch must
/// not depend on scheduling.
pub fn merge_sorted(outcomes: &HashMap<String, SourceOutcome>) -> Vec<RawResult> {
    let mut merged: Vec<RawResult> = outcomes
        .values()
        .filter_map(|outcome| match outcome {
            SourceOutcome::Results(results) => Some(results.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    merged.sort_by(|a, b| (a.source_name.as_str(), a.url.as_str()).cmp(&(b.source_name.as_str(), b.url.as_str())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(source: &str, url: &str) -> RawResult {
        RawResult {
            url: url.to_string(),
            title: String::new(),
            snippet_text: String::new(),
            source_name: source.to_string(),
            domain: "example.com".to_string(),
            fetched_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn merge_sorted_is_deterministic_regardless_of_map_iteration_order() {
        let mut outcomes = HashMap::new();
        outcomes.insert("b_source".to_string(), SourceOutcome::Results(vec![sample("b_source", "https://b/2")]));
        outcomes.insert("a_source".to_string(), SourceOutcome::Results(vec![sample("a_source", "https://a/1")]));
        outcomes.insert("c_source".to_string(), SourceOutcome::Skipped);

        let merged = merge_sorted(&outcomes);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_name, "a_source");
        assert_eq!(merged[1].source_name, "b_source");
    }

    #[test]
    fn merge_sorted_excludes_failed_and_skipped_sources() {
        let mut outcomes = HashMap::new();
        outcomes.insert("failed".to_string(), SourceOutcome::Failed(ResearchError::Configuration("x".into())));
        outcomes.insert("skipped".to_string(), SourceOutcome::Skipped);
        assert!(merge_sorted(&outcomes).is_empty());
    }
}
