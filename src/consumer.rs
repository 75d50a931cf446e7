//! NATS consumer for scoring requests

use crate::scoring::{ScoringService, DEFAULT_TOP_K};
use crate::types::transaction::FeatureVector;
use crate::types::verdict::{ExplanationEntry, Verdict};
use anyhow::Result;
use async_nats::{Client, Subscriber};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Incoming request payload
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreRequest {
    /// Feature values keyed by name
    pub features: Value,
    /// Also compute a local explanation
    #[serde(default)]
    pub explain: bool,
    pub top_k: Option<usize>,
}

/// Reply payload. Serialized untagged: either a scored verdict or `{"error": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ScoreReply {
    Scored {
        #[serde(flatten)]
        verdict: Verdict,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation: Option<Vec<ExplanationEntry>>,
    },
    Error {
        error: String,
    },
}

impl ScoreReply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Score (and optionally explain) one request. Never fails: invalid input,
/// a failed worker or an explanation past `timeout` becomes an error reply.
pub async fn handle(
    service: &ScoringService,
    request: &ScoreRequest,
    timeout: Option<Duration>,
) -> ScoreReply {
    let vector = match FeatureVector::from_json(&request.features) {
        Ok(vector) => vector,
        Err(e) => return ScoreReply::error(e.to_string()),
    };

    let verdict = service.score(&vector);
    let explanation = if request.explain {
        let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
        match service.explain_within(vector, top_k, timeout).await {
            Ok(entries) => Some(entries),
            Err(e) => return ScoreReply::error(e.to_string()),
        }
    } else {
        None
    };

    ScoreReply::Scored {
        verdict,
        explanation,
    }
}

/// Decode a raw payload and handle it.
pub async fn handle_payload(
    service: &ScoringService,
    payload: &[u8],
    timeout: Option<Duration>,
) -> ScoreReply {
    match serde_json::from_slice::<ScoreRequest>(payload) {
        Ok(request) => handle(service, &request, timeout).await,
        Err(e) => ScoreReply::error(format!("invalid request: {e}")),
    }
}

/// Bounds the number of requests handled at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Wait for a free worker slot. The slot is released when the permit
    /// is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Ok(self.semaphore.clone().acquire_owned().await?)
    }

    /// Number of requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.workers - self.semaphore.available_permits()
    }

    /// Wait until every in-flight request has released its slot, then
    /// refuse new ones.
    pub async fn drain(&self) -> Result<()> {
        let all = self.semaphore.acquire_many(self.workers as u32).await?;
        all.forget();
        self.semaphore.close();
        Ok(())
    }
}

/// Consumer for receiving scoring requests from NATS
pub struct ScoreRequestConsumer {
    client: Client,
    subject: String,
}

impl ScoreRequestConsumer {
    /// Create a new request consumer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the request subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to scoring request subject");
        Ok(subscriber)
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
