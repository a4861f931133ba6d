//! Asynchronous job fabric.
//!
//! Durable at-least-once queues over Redis: priority FIFO dispatch, delayed
//! jobs, exponential/fixed backoff, stalled-job recovery and a per-queue
//! dead-letter list. The matching pipeline, settlement, swaps, market
//! deployment and reconciliation all run on this substrate.

pub mod fabric;
pub mod queues;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use fabric::{JobFabric, JobFabricConfig, ScheduleHandle, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base_ms: u64,
}

impl BackoffPolicy {
    pub fn exponential(base_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_ms,
        }
    }

    pub fn fixed(base_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_ms,
        }
    }

    /// Delay before the (attempts_made + 1)-th attempt, capped at an hour.
    pub fn delay_ms(&self, attempts_made: u32) -> u64 {
        const CAP_MS: u64 = 3_600_000;
        let delay = match self.kind {
            BackoffKind::Fixed => self.base_ms,
            BackoffKind::Exponential => {
                let factor = 2u64.saturating_pow(attempts_made.min(32));
                self.base_ms.saturating_mul(factor)
            }
        };
        delay.min(CAP_MS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: BackoffPolicy,
    pub job_id: Option<String>,
    pub priority: u32,
    pub delay_ms: u64,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: BackoffPolicy::exponential(1_000),
            job_id: None,
            priority: 10,
            delay_ms: 0,
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

impl JobOptions {
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Durable job state, serialized as JSON under the queue's data key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub payload: Value,
    pub attempts: u32,
    pub attempts_made: u32,
    pub stalls: u32,
    pub priority: u32,
    /// Waiting-set score frozen at submit time: priority major, FIFO minor.
    pub pri_score: f64,
    pub backoff: BackoffPolicy,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    pub submitted_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What a handler sees for one delivery.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: String,
    pub queue: String,
    pub payload: Value,
    /// Completed attempts before this delivery; 0 on the first run.
    pub attempts_made: u32,
    /// Configured attempt budget. `attempts_made + 1 == attempts` marks the
    /// final delivery, where handlers run their compensating actions.
    pub attempts: u32,
}

impl JobContext {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts_made + 1 >= self.attempts
    }
}

/// Handler failure classification: transient failures re-enter the queue
/// with backoff until attempts are exhausted; terminal failures go straight
/// to the dead-letter list.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("transient: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("terminal: {0}")]
    Terminal(#[source] anyhow::Error),
}

impl JobError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        JobError::Transient(err.into())
    }

    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        JobError::Terminal(err.into())
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError>;
}

/// Handle returned by `submit`. `existing` is true when the job_id was
/// already queued and the submit was a no-op.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
    pub existing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = BackoffPolicy::exponential(2_000);
        assert_eq!(policy.delay_ms(0), 2_000);
        assert_eq!(policy.delay_ms(1), 4_000);
        assert_eq!(policy.delay_ms(2), 8_000);
        assert_eq!(policy.delay_ms(3), 16_000);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(500);
        assert_eq!(policy.delay_ms(0), 500);
        assert_eq!(policy.delay_ms(7), 500);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = BackoffPolicy::exponential(60_000);
        assert_eq!(policy.delay_ms(30), 3_600_000);
    }

    #[test]
    fn final_attempt_detection() {
        let ctx = JobContext {
            id: "j".into(),
            queue: "q".into(),
            payload: Value::Null,
            attempts_made: 4,
            attempts: 5,
        };
        assert!(ctx.is_final_attempt());

        let ctx = JobContext { attempts_made: 3, ..ctx };
        assert!(!ctx.is_final_attempt());
    }

    #[test]
    fn options_builder_floors_attempts_at_one() {
        let opts = JobOptions::default().with_attempts(0);
        assert_eq!(opts.attempts, 1);
    }
}
