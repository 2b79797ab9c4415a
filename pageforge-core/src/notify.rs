//! Completion report delivery with bounded exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{ForgeError, Result};
use crate::task::Round;

/// Body posted to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub email: String,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// Timed suspension, injectable so retry schedules can be tested instantly.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// `backoff[i]` is waited before attempt `i + 2`. Entries past
    /// `max_attempts - 1` are never used.
    pub backoff: Vec<Duration>,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: [1, 2, 4, 8].into_iter().map(Duration::from_secs).collect(),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based attempt; `None` for the first.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt < 2 {
            return None;
        }
        let idx = (attempt - 2) as usize;
        // Past the end of the schedule the last step repeats.
        self.backoff.get(idx).or(self.backoff.last()).copied()
    }
}

/// Posts [`NotificationPayload`]s to callback URLs.
#[derive(Clone)]
pub struct NotificationDispatcher {
    http: reqwest::Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl NotificationDispatcher {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            http: reqwest::Client::new(),
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver until a 200 arrives or the attempt budget is spent.
    pub async fn notify(&self, callback_url: &str, payload: &NotificationPayload) -> Result<()> {
        tracing::info!(
            url = %callback_url,
            task = %payload.task,
            round = %payload.round,
            "Notifying evaluator"
        );
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.policy.max_attempts {
            if let Some(delay) = self.policy.delay_before(attempt) {
                tracing::warn!(attempt, ?delay, error = %last_error, "Retrying notification");
                self.sleeper.sleep(delay).await;
            }

            let result = self
                .http
                .post(callback_url)
                .timeout(self.policy.attempt_timeout)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                    tracing::info!(attempt, "Evaluator notified");
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = format!("status {}", resp.status());
                }
                Err(e) if e.is_timeout() => {
                    last_error = format!("timed out after {:?}", self.policy.attempt_timeout);
                }
                Err(e) => {
                    last_error = format!("request failed: {e}");
                }
            }
        }

        tracing::error!(url = %callback_url, error = %last_error, "Notification retries exhausted");
        Err(ForgeError::DeliveryFailed {
            url: callback_url.to_string(),
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}
