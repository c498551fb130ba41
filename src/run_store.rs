//! Run Store: writes the append-only run directory tree described in
//! `spec.md` §6. Nothing here is ever overwritten after the run finishes —
//! each write targets a fresh path under a per-run directory named by
//! timestamp and a slug of the question.
//!
//! Grounded on the teacher's `Config`/output-path conventions (paths built
//! from configured root directories rather than hardcoded), generalized to
//! the fixed multi-file layout the engine design specifies.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::model::{CoverageMetadata, Hypothesis, Run, Task};

pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Create the run directory `<output_dir>/<timestamp>_<slug>/` and its
    /// `tasks/` subtree, returning a handle scoped to that directory.
    pub fn create(config: &Config, started_at: DateTime<Utc>, question: &str) -> Result<Self> {
        let dir_name = format!("{}_{}", started_at.format("%Y%m%dT%H%M%SZ"), slugify(question));
        let root = Path::new(&config.output_dir).join(dir_name);
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn write_run_config(&self, config: &Config) -> Result<()> {
        self.write_json("run_config.json", config)
    }

    pub fn write_decomposition(&self, tasks: &[Task]) -> Result<()> {
        let summary: Vec<_> = tasks.iter().map(|t| (t.ordinal, &t.query, &t.rationale)).collect();
        self.write_json("decomposition.json", &summary)
    }

    pub fn write_hypotheses(&self, hypotheses: &[Hypothesis]) -> Result<()> {
        self.write_json("hypotheses.json", hypotheses)
    }

    pub fn write_coverage(&self, coverage: &CoverageMetadata) -> Result<()> {
        self.write_json("coverage.json", coverage)
    }

    pub fn write_report(&self, markdown: &str) -> Result<()> {
        std::fs::write(self.root.join("report.md"), markdown)?;
        Ok(())
    }

    pub fn write_cost(&self, cost_usd: f64, per_model: &serde_json::Value) -> Result<()> {
        self.write_json("cost.json", &serde_json::json!({"total_usd": cost_usd, "per_model": per_model}))
    }

    /// One JSON object per line, appended — the event log every component
    /// writes progress notes to over the life of the run.
    pub fn append_event(&self, event: &str) -> Result<()> {
        use std::io::Write;
        let line = serde_json::json!({"timestamp": Utc::now(), "event": event});
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(self.root.join("events.jsonl"))?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }

    /// Write a task's full per-attempt record under `tasks/<ordinal>/`.
    pub fn write_task(&self, task: &Task) -> Result<()> {
        let dir = self.root.join("tasks").join(task.ordinal.to_string());
        std::fs::create_dir_all(&dir)?;

        write_json_at(&dir.join("query_history.json"), &task.diagnostics.query_history)?;
        write_json_at(&dir.join("raw_results.json"), &task.accumulated_results().to_vec())?;
        write_json_at(&dir.join("relevance.json"), &task.relevance_scores)?;
        write_json_at(&dir.join("entities.json"), &task.entities)?;
        write_json_at(&dir.join("claims.json"), &task.claims)?;
        Ok(())
    }

    /// Persist the whole run after finalization. Individual artifacts are
    /// also written incrementally via the methods above so a crash mid-run
    /// still leaves a partially inspectable directory.
    pub fn write_run(&self, run: &Run) -> Result<()> {
        self.write_json("run.json", run)
    }

    fn write_json<T: Serialize + ?Sized>(&self, filename: &str, value: &T) -> Result<()> {
        write_json_at(&self.root.join(filename), value)
    }
}

fn write_json_at<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Lowercase, whitespace/punctuation collapsed to single hyphens, truncated
/// to a reasonable directory-name length.
fn slugify(question: &str) -> String {
    let mut slug = String::new();
    let mut last_was_hyphen = false;
    for ch in question.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    let trimmed = slug.trim_matches('-');
    trimmed.chars().take(60).collect::<String>().trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation_and_lowercases() {
        assert_eq!(slugify("What is NASA's budget?"), "what-is-nasa-s-budget");
    }

    #[test]
    fn slugify_truncates_long_questions() {
        let long = "a".repeat(200);
        assert!(slugify(&long).len() <= 60);
    }

    #[test]
    fn create_builds_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output_dir = dir.path().to_string_lossy().to_string();
        let store = RunStore::create(&config, Utc::now(), "test question").unwrap();
        assert!(store.path().exists());
    }
}
