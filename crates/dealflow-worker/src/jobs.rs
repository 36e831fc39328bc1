//! Job bodies for the standard queues
//!
//! Scoring, data-source sync and report export live in other services.
//! These processors stand in for them so the worker runs on its own; each
//! one sleeps for the configured latency to mimic the remote call.

use dealflow_queue::{BoxError, JobContext, ProcessResult, StandardQueues};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const SCORE_DEAL: &str = "score-deal";
pub const BATCH_SCORE: &str = "batch-score";
pub const SYNC_SOURCE: &str = "sync-source";
pub const GENERATE_REPORT: &str = "generate-report";

const KNOWN_SOURCES: &[&str] = &["crunchbase", "pitchbook", "internal-crm"];

/// Payload for a single deal scoring job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDealPayload {
    pub deal_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Payload for batch scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScorePayload {
    pub deal_ids: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub report: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "xlsx".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealScore {
    pub deal_id: String,
    pub investment_fit_score: u32,
}

impl DealScore {
    /// Deterministic stand-in for the scoring model, in `0..=100`
    pub fn for_deal(deal_id: &str) -> Self {
        Self {
            deal_id: deal_id.to_string(),
            investment_fit_score: deal_id.bytes().map(u32::from).sum::<u32>() % 101,
        }
    }
}

/// Register every processor on its queue.
pub fn register(queues: &StandardQueues, latency: Duration) {
    queues
        .scoring
        .process(SCORE_DEAL, move |ctx| score_deal(ctx, latency));
    queues
        .scoring
        .process(BATCH_SCORE, move |ctx| batch_score(ctx, latency));
    queues
        .sync
        .process(SYNC_SOURCE, move |ctx| sync_source(ctx, latency));
    queues
        .report
        .process(GENERATE_REPORT, move |ctx| generate_report(ctx, latency));
}

fn payload<P: DeserializeOwned>(ctx: &JobContext<Value>) -> Result<P, BoxError> {
    Ok(serde_json::from_value(ctx.data().clone())?)
}

async fn score_deal(ctx: JobContext<Value>, latency: Duration) -> ProcessResult {
    let payload: ScoreDealPayload = payload(&ctx)?;
    info!(job_id = %ctx.id(), deal_id = %payload.deal_id, "Processing scoring job");

    tokio::time::sleep(latency).await;
    let score = DealScore::for_deal(&payload.deal_id);
    ctx.update_progress(100);

    Ok(serde_json::to_value(score)?)
}

async fn batch_score(ctx: JobContext<Value>, latency: Duration) -> ProcessResult {
    let payload: BatchScorePayload = payload(&ctx)?;
    let total = payload.deal_ids.len();
    info!(job_id = %ctx.id(), total_deals = total, "Processing batch scoring job");

    let mut scores = Vec::with_capacity(total);
    for (done, deal_id) in payload.deal_ids.iter().enumerate() {
        tokio::time::sleep(latency).await;
        scores.push(DealScore::for_deal(deal_id));
        // Nearest whole percent
        ctx.update_progress((((done + 1) * 200 + total) / (2 * total)) as i64);
    }

    Ok(serde_json::to_value(scores)?)
}

async fn sync_source(ctx: JobContext<Value>, latency: Duration) -> ProcessResult {
    let payload: SyncPayload = payload(&ctx)?;
    tokio::time::sleep(latency).await;

    if !KNOWN_SOURCES.contains(&payload.source.as_str()) {
        return Err(format!("data source {} unreachable", payload.source).into());
    }
    ctx.update_progress(100);
    Ok(json!({ "source": payload.source, "synced": true }))
}

async fn generate_report(ctx: JobContext<Value>, latency: Duration) -> ProcessResult {
    let payload: ReportPayload = payload(&ctx)?;
    ctx.update_progress(10);
    tokio::time::sleep(latency).await;
    ctx.update_progress(90);

    Ok(json!({
        "report": payload.report,
        "format": payload.format,
        "file": format!("{}.{}", payload.report, payload.format),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealflow_queue::{Job, JobId, JobStatus, Queue, QueueManager};

    async fn settled(queue: &Queue<Value>, id: &JobId) -> Job<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(job) = queue.get_job(id).filter(|job| job.is_terminal()) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job should settle")
    }

    fn queues() -> StandardQueues {
        let queues = StandardQueues::init(&QueueManager::default()).unwrap();
        register(&queues, Duration::ZERO);
        queues
    }

    #[test]
    fn test_score_is_deterministic_and_bounded() {
        let a = DealScore::for_deal("deal-42");
        assert_eq!(a, DealScore::for_deal("deal-42"));
        assert!(a.investment_fit_score <= 100);
    }

    #[tokio::test]
    async fn test_score_deal() {
        let queues = queues();
        let job = queues.scoring.add(SCORE_DEAL, json!({ "deal_id": "acme" }));
        let done = settled(&queues.scoring, &job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        let score: DealScore = serde_json::from_value(done.result.unwrap()).unwrap();
        assert_eq!(score, DealScore::for_deal("acme"));
    }

    #[tokio::test]
    async fn test_batch_score_reports_progress() {
        let queues = queues();
        let mut events = queues.scoring.subscribe();
        let job = queues
            .scoring
            .add(BATCH_SCORE, json!({ "deal_ids": ["a", "b", "c"] }));

        let mut progress = Vec::new();
        while progress.len() < 3 {
            if let dealflow_queue::QueueEvent::Progress { progress: p, .. } =
                events.recv().await.unwrap()
            {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![33, 67, 100]);

        let done = settled(&queues.scoring, &job.id).await;
        assert_eq!(done.result.unwrap().as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_bad_payload_fails_after_retries() {
        let queues = queues();
        let job = queues.scoring.add(SCORE_DEAL, json!({ "deal": "missing id" }));
        let done = settled(&queues.scoring, &job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempts, 3);
        assert!(done.error.unwrap().contains("deal_id"));
    }

    #[tokio::test]
    async fn test_unknown_source_uses_sync_retry_budget() {
        let queues = queues();
        let job = queues.sync.add(SYNC_SOURCE, json!({ "source": "fax-machine" }));
        let done = settled(&queues.sync, &job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempts, 5);
        assert_eq!(done.error.as_deref(), Some("data source fax-machine unreachable"));
    }

    #[tokio::test]
    async fn test_generate_report() {
        let queues = queues();
        let job = queues.report.add(GENERATE_REPORT, json!({ "report": "pipeline" }));
        let done = settled(&queues.report, &job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.unwrap()["file"], "pipeline.xlsx");
    }
}
