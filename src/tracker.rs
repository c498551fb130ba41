//! Cost/Request Tracker: a durable, append-only log of every external call
//! (LLM and source integration alike), plus the aggregations needed to
//! reverse-engineer undocumented rate limits and watch spend. Ported from
//! the teacher's `cost_tracker.rs`, generalized from "LLM calls only" to
//! "every outbound API call", and split from cost accounting (which lives
//! in [`crate::llm::CostAccumulator`] — the tracker is observability, not
//! budget enforcement).
//!
//! The SQLite ledger and the JSONL file are the only two pieces of shared
//! mutable state in the whole engine; both are serialized behind a single
//! `tokio::sync::Mutex` to give the "single-writer queue" the design calls
//! for without per-call lock contention mattering (writes are cheap and
//! infrequent relative to the LLM/HTTP calls they describe).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Row, SqlitePool};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// One record per external call. Mirrors `spec.md`'s `api_requests.jsonl`
/// schema exactly so the JSONL file and the SQLite ledger stay in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiCallRecord {
    pub timestamp: DateTime<Utc>,
    pub api: String,
    pub endpoint: String,
    pub status: i64,
    pub latency_ms: i64,
    pub error: Option<String>,
    /// JSON-encoded, credential-masked parameters.
    pub sanitized_params: String,
}

pub struct Tracker {
    pool: SqlitePool,
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Tracker {
    pub async fn new(sqlite_path: impl AsRef<Path>, log_path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        if let Some(parent) = sqlite_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", sqlite_path.as_ref().display()))
            .await?;

        let tracker = Self {
            pool,
            log_path,
            write_lock: Mutex::new(()),
        };
        tracker.initialize_schema().await?;
        Ok(Arc::new(tracker))
    }

    #[cfg(test)]
    pub async fn in_memory(log_path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tracker = Self {
            pool,
            log_path,
            write_lock: Mutex::new(()),
        };
        tracker.initialize_schema().await?;
        Ok(Arc::new(tracker))
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                api TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                status INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                error TEXT,
                sanitized_params TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_requests_api ON api_requests(api)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_requests_timestamp ON api_requests(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_requests_status ON api_requests(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record one external call. Never propagates an error to the caller —
    /// a logging failure must not take down the research pipeline — but
    /// does warn loudly, since a silently-broken request log defeats the
    /// whole point of this module.
    pub async fn log_call(
        &self,
        api: &str,
        endpoint: &str,
        status: u16,
        latency: Duration,
        error: Option<String>,
        params: Value,
    ) {
        let record = ApiCallRecord {
            timestamp: Utc::now(),
            api: api.to_string(),
            endpoint: endpoint.to_string(),
            status: status as i64,
            latency_ms: latency.as_millis() as i64,
            error,
            sanitized_params: mask_params(&params).to_string(),
        };

        let _guard = self.write_lock.lock().await;

        if let Err(err) = self.append_jsonl(&record).await {
            warn!(%err, "failed to append to api_requests.jsonl");
        }
        if let Err(err) = self.insert_row(&record).await {
            warn!(%err, "failed to insert api_requests row");
        }
    }

    async fn append_jsonl(&self, record: &ApiCallRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn insert_row(&self, record: &ApiCallRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_requests (timestamp, api, endpoint, status, latency_ms, error, sanitized_params)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.api)
        .bind(&record.endpoint)
        .bind(record.status)
        .bind(record.latency_ms)
        .bind(&record.error)
        .bind(&record.sanitized_params)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Total and per-API call counts since `since`.
    pub async fn call_counts_since(&self, since: DateTime<Utc>) -> Result<CallCounts> {
        let total: i64 = sqlx::query("SELECT COUNT(*) FROM api_requests WHERE timestamp >= ?")
            .bind(since.to_rfc3339())
            .fetch_one(&self.pool)
            .await?
            .get(0);

        let rows = sqlx::query("SELECT api, COUNT(*) FROM api_requests WHERE timestamp >= ? GROUP BY api")
            .bind(since.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

        let per_api = rows
            .into_iter()
            .map(|row| (row.get::<String, _>(0), row.get::<i64, _>(1) as u64))
            .collect();

        Ok(CallCounts {
            total: total as u64,
            per_api,
        })
    }

    /// Histogram of 429 responses per API since `since`.
    pub async fn rate_limit_histogram(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let rows = sqlx::query(
            "SELECT api, COUNT(*) FROM api_requests WHERE timestamp >= ? AND status = 429 GROUP BY api",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>(0), row.get::<i64, _>(1) as u64))
            .collect())
    }

    /// For every 429 a given API received since `since`, count how many
    /// requests to that same API occurred in the preceding `window`. This
    /// is the "requests-in-the-last-N-before-a-429" analysis `spec.md`
    /// calls for, used to reverse-engineer an undocumented rate limit.
    pub async fn requests_before_rate_limit(
        &self,
        api: &str,
        since: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<u64>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT timestamp FROM api_requests WHERE api = ? AND status = 429 AND timestamp >= ? ORDER BY timestamp",
        )
        .bind(api)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for (rate_limit_ts,) in rows {
            let window_start = DateTime::parse_from_rfc3339(&rate_limit_ts)
                .map(|dt| dt.with_timezone(&Utc) - chrono::Duration::from_std(window).unwrap_or_default())
                .unwrap_or(since);
            let count: i64 = sqlx::query(
                "SELECT COUNT(*) FROM api_requests WHERE api = ? AND timestamp >= ? AND timestamp < ?",
            )
            .bind(api)
            .bind(window_start.to_rfc3339())
            .bind(&rate_limit_ts)
            .fetch_one(&self.pool)
            .await?
            .get(0);
            counts.push(count as u64);
        }
        Ok(counts)
    }

    /// Average interval between consecutive calls to `api` since `since`,
    /// in milliseconds. `None` if fewer than two calls exist in the
    /// window.
    pub async fn average_interval_ms(&self, api: &str, since: DateTime<Utc>) -> Result<Option<f64>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT timestamp FROM api_requests WHERE api = ? AND timestamp >= ? ORDER BY timestamp",
        )
        .bind(api)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        if rows.len() < 2 {
            return Ok(None);
        }
        let timestamps: Vec<DateTime<Utc>> = rows
            .iter()
            .filter_map(|(ts,)| DateTime::parse_from_rfc3339(ts).ok().map(|dt| dt.with_timezone(&Utc)))
            .collect();
        let total_ms: i64 = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds())
            .sum();
        Ok(Some(total_ms as f64 / (timestamps.len() - 1) as f64))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    pub total: u64,
    pub per_api: Vec<(String, u64)>,
}

/// Mask any parameter whose key looks credential-shaped
/// (`api_key`, `token`, `authorization`, `secret`, `password`) as
/// `prefix***suffix`, keeping enough of each end to be recognizable in
/// logs without leaking the secret.
fn mask_params(params: &Value) -> Value {
    match params {
        Value::Object(map) => {
            let masked = map
                .iter()
                .map(|(key, value)| {
                    let lower = key.to_lowercase();
                    let is_credential = ["key", "token", "authorization", "secret", "password"]
                        .iter()
                        .any(|needle| lower.contains(needle));
                    let value = if is_credential {
                        mask_value(value)
                    } else {
                        value.clone()
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(masked)
        }
        other => other.clone(),
    }
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_str(s)),
        other => other.clone(),
    }
}

fn mask_str(secret: &str) -> String {
    let len = secret.len();
    if len <= 8 {
        return "***".to_string();
    }
    format!("{}***{}", &secret[..4], &secret[len - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_credential_looking_fields() {
        let params = serde_json::json!({
            "api_key": "sk-ant-abcdefgh12345678",
            "query": "federal jobs",
        });
        let masked = mask_params(&params);
        assert_eq!(masked["query"], "federal jobs");
        let masked_key = masked["api_key"].as_str().unwrap();
        assert!(masked_key.contains("***"));
        assert!(!masked_key.contains("abcdefgh1234"));
    }

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(mask_str("abc"), "***");
    }

    #[tokio::test]
    async fn log_call_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(dir.path().join("ledger.db"), dir.path().join("api_requests.jsonl"))
            .await
            .unwrap();

        tracker
            .log_call(
                "llm",
                "chat.completions",
                200,
                Duration::from_millis(120),
                None,
                serde_json::json!({"model": "grok-4-1-fast-reasoning"}),
            )
            .await;

        let counts = tracker.call_counts_since(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.per_api, vec![("llm".to_string(), 1)]);

        let contents = tokio::fs::read_to_string(dir.path().join("api_requests.jsonl")).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_histogram_counts_429s_per_api() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(dir.path().join("ledger.db"), dir.path().join("api_requests.jsonl"))
            .await
            .unwrap();

        tracker.log_call("federal_jobs", "search", 200, Duration::from_millis(50), None, serde_json::json!({})).await;
        tracker.log_call("federal_jobs", "search", 429, Duration::from_millis(50), None, serde_json::json!({})).await;

        let since = Utc::now() - chrono::Duration::hours(1);
        let histogram = tracker.rate_limit_histogram(since).await.unwrap();
        assert_eq!(histogram, vec![("federal_jobs".to_string(), 1)]);
    }
}
