//! Redis-backed queue engine.
//!
//! Per queue `{q}` the fabric keeps:
//!
//!   jobs:{q}:data:{id}   job record (JSON), existence doubles as the
//!                        job-id dedupe guard
//!   jobs:{q}:seq         submit counter for FIFO tie-breaking
//!   jobs:{q}:waiting     ZSET, score = priority * 1e12 + seq
//!   jobs:{q}:delayed     ZSET, score = ready-at unix ms
//!   jobs:{q}:active      ZSET, score = stall deadline unix ms
//!   jobs:{q}:{dlq}       LIST of dead-lettered records, payload preserved
//!
//! The submit, acquire and requeue steps run as Lua scripts so a crash
//! between commands can never lose a job; a stalled job sits in `active`
//! until the reaper's deadline sweep returns it to `waiting`.

use chrono::Utc;
use parking_lot::Mutex;
use redis::Script;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{JobContext, JobError, JobHandle, JobHandler, JobOptions, JobRecord};
use crate::cache::RedisClient;

const SUBMIT_SCRIPT: &str = r#"
local created = redis.call('SET', KEYS[1], ARGV[1], 'NX')
if not created then return 0 end
local seq = redis.call('INCR', KEYS[4])
local score = tonumber(ARGV[2]) * 1e12 + seq
local job = cjson.decode(ARGV[1])
job.pri_score = score
redis.call('SET', KEYS[1], cjson.encode(job))
if tonumber(ARGV[3]) > 0 then
  redis.call('ZADD', KEYS[3], tonumber(ARGV[3]), job.id)
else
  redis.call('ZADD', KEYS[2], score, job.id)
end
return 1
"#;

const ACQUIRE_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then return false end
redis.call('ZADD', KEYS[2], tonumber(ARGV[1]), popped[1])
return popped[1]
"#;

const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  local raw = redis.call('GET', ARGV[3] .. id)
  local score = 0
  if raw then
    local ok, job = pcall(cjson.decode, raw)
    if ok and type(job) == 'table' and job.pri_score then score = job.pri_score end
  end
  redis.call('ZADD', KEYS[2], score, id)
end
return #due
"#;

const REAP_SCRIPT: &str = r#"
local stalled = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(stalled) do
  redis.call('ZREM', KEYS[1], id)
  local raw = redis.call('GET', ARGV[3] .. id)
  local score = 0
  if raw then
    local ok, job = pcall(cjson.decode, raw)
    if ok and type(job) == 'table' and job.pri_score then score = job.pri_score end
  end
  redis.call('ZADD', KEYS[2], score, id)
end
return stalled
"#;

#[derive(Debug, Clone)]
pub struct JobFabricConfig {
    pub key_prefix: String,
    pub dlq_suffix: String,
    pub stall_timeout_ms: u64,
    pub max_stalls: u32,
    pub poll_interval_ms: u64,
    pub maintenance_interval_ms: u64,
    pub default_attempts: u32,
    pub default_backoff_ms: u64,
}

impl Default for JobFabricConfig {
    fn default() -> Self {
        Self {
            key_prefix: "jobs".to_string(),
            dlq_suffix: "dead-letter".to_string(),
            stall_timeout_ms: 30_000,
            max_stalls: 3,
            poll_interval_ms: 200,
            maintenance_interval_ms: 1_000,
            default_attempts: 5,
            default_backoff_ms: 2_000,
        }
    }
}

/// In-process token bucket; caps dispatch rate for a queue across all of
/// its worker tasks.
struct TokenBucket {
    rate_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    fn new(rate_per_sec: u32) -> Self {
        Self {
            rate_per_sec: rate_per_sec as f64,
            state: Mutex::new((rate_per_sec as f64, Instant::now())),
        }
    }

    async fn acquire(&self) {
        loop {
            {
                let mut state = self.state.lock();
                let (ref mut tokens, ref mut last) = *state;
                let elapsed = last.elapsed().as_secs_f64();
                *tokens = (*tokens + elapsed * self.rate_per_sec).min(self.rate_per_sec);
                *last = Instant::now();
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub struct JobFabric {
    redis: Arc<RedisClient>,
    config: JobFabricConfig,
    rate_limits: dashmap::DashMap<String, Arc<TokenBucket>>,
}

pub struct WorkerHandle {
    queue: String,
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal graceful stop and wait for in-flight jobs up to `grace`.
    pub async fn stop(self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        let deadline = Instant::now() + grace;
        for handle in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                tracing::warn!(queue = %self.queue, "worker did not stop within grace period");
            }
        }
    }
}

pub struct ScheduleHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduleHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

impl JobFabric {
    pub fn new(redis: Arc<RedisClient>, config: JobFabricConfig) -> Self {
        Self {
            redis,
            config,
            rate_limits: dashmap::DashMap::new(),
        }
    }

    pub fn config(&self) -> &JobFabricConfig {
        &self.config
    }

    /// Options seeded from the fabric-wide retry policy.
    pub fn default_options(&self) -> JobOptions {
        JobOptions::default()
            .with_attempts(self.config.default_attempts)
            .with_backoff(super::BackoffPolicy::exponential(self.config.default_backoff_ms))
    }

    /// Cap a queue's dispatch rate, shared by all its worker tasks.
    pub fn set_rate_limit(&self, queue: &str, per_sec: u32) {
        self.rate_limits
            .insert(queue.to_string(), Arc::new(TokenBucket::new(per_sec)));
    }

    fn data_prefix(&self, queue: &str) -> String {
        format!("{}:{}:data:", self.config.key_prefix, queue)
    }

    fn data_key(&self, queue: &str, id: &str) -> String {
        format!("{}{}", self.data_prefix(queue), id)
    }

    fn waiting_key(&self, queue: &str) -> String {
        format!("{}:{}:waiting", self.config.key_prefix, queue)
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}:{}:delayed", self.config.key_prefix, queue)
    }

    fn active_key(&self, queue: &str) -> String {
        format!("{}:{}:active", self.config.key_prefix, queue)
    }

    fn seq_key(&self, queue: &str) -> String {
        format!("{}:{}:seq", self.config.key_prefix, queue)
    }

    fn dlq_key(&self, queue: &str) -> String {
        format!("{}:{}:{}", self.config.key_prefix, queue, self.config.dlq_suffix)
    }

    /// Enqueue a job. A `job_id` collision is a no-op returning the existing
    /// handle, which makes deterministic ids the dedupe mechanism.
    pub async fn submit(
        &self,
        queue: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, redis::RedisError> {
        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now_ms = Utc::now().timestamp_millis();

        let record = JobRecord {
            id: id.clone(),
            queue: queue.to_string(),
            payload,
            attempts: options.attempts.max(1),
            attempts_made: 0,
            stalls: 0,
            priority: options.priority,
            pri_score: 0.0,
            backoff: options.backoff,
            remove_on_complete: options.remove_on_complete,
            remove_on_fail: options.remove_on_fail,
            submitted_at_ms: now_ms,
            last_error: None,
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "job encode", e.to_string())))?;

        let ready_at = if options.delay_ms > 0 {
            now_ms + options.delay_ms as i64
        } else {
            0
        };

        let data_key = self.data_key(queue, &id);
        let waiting = self.waiting_key(queue);
        let delayed = self.delayed_key(queue);
        let seq = self.seq_key(queue);

        let created: i32 = self
            .redis
            .with_retry(|mut conn| {
                let raw = raw.clone();
                let data_key = data_key.clone();
                let waiting = waiting.clone();
                let delayed = delayed.clone();
                let seq = seq.clone();
                let priority = options.priority;
                async move {
                    Script::new(SUBMIT_SCRIPT)
                        .key(&data_key)
                        .key(&waiting)
                        .key(&delayed)
                        .key(&seq)
                        .arg(&raw)
                        .arg(priority)
                        .arg(ready_at)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        if created == 1 {
            metrics::counter!("jobs_submitted_total", "queue" => queue.to_string()).increment(1);
        }

        Ok(JobHandle {
            id,
            queue: queue.to_string(),
            existing: created == 0,
        })
    }

    /// Register a repeatable job. The schedule is re-established at every
    /// boot; the slot-stamped job id keeps it idempotent across processes
    /// and restarts.
    pub fn schedule(
        self: &Arc<Self>,
        queue: &str,
        payload: Value,
        every: Duration,
        job_id: &str,
    ) -> ScheduleHandle {
        let fabric = self.clone();
        let queue = queue.to_string();
        let job_id = job_id.to_string();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let every_ms = every.as_millis().max(1) as i64;
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() { break }
                        continue;
                    }
                }
                let slot = Utc::now().timestamp_millis() / every_ms;
                let instance_id = format!("{job_id}:{slot}");
                let options = JobOptions::default()
                    .with_job_id(instance_id)
                    .with_attempts(1);
                if let Err(e) = fabric.submit(&queue, payload.clone(), options).await {
                    tracing::warn!(queue = %queue, job_id = %job_id, "failed to submit scheduled job: {e}");
                }
            }
        });

        ScheduleHandle { stop_tx, handle }
    }

    /// Start a worker pool on a queue. One maintenance task per pool
    /// promotes delayed jobs and reaps stalled ones.
    pub fn run_worker(
        self: &Arc<Self>,
        queue: &str,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(concurrency + 1);

        {
            let fabric = self.clone();
            let queue = queue.to_string();
            let mut stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                let interval = Duration::from_millis(fabric.config.maintenance_interval_ms);
                loop {
                    if *stop_rx.borrow() {
                        break;
                    }
                    if let Err(e) = fabric.run_maintenance(&queue).await {
                        tracing::warn!(queue = %queue, "queue maintenance failed: {e}");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            }));
        }

        for worker_idx in 0..concurrency.max(1) {
            let fabric = self.clone();
            let queue = queue.to_string();
            let handler = handler.clone();
            let mut stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                tracing::debug!(queue = %queue, worker = worker_idx, "worker started");
                loop {
                    if *stop_rx.borrow() {
                        break;
                    }
                    if let Some(limiter) = fabric.rate_limits.get(&queue).map(|e| e.value().clone()) {
                        limiter.acquire().await;
                    }
                    match fabric.acquire(&queue).await {
                        Ok(Some(job_id)) => {
                            fabric.process_one(&queue, &job_id, handler.as_ref()).await;
                        }
                        Ok(None) => {
                            let idle = Duration::from_millis(fabric.config.poll_interval_ms);
                            tokio::select! {
                                _ = tokio::time::sleep(idle) => {}
                                _ = stop_rx.changed() => {}
                            }
                        }
                        Err(e) => {
                            tracing::warn!(queue = %queue, "failed to acquire job: {e}");
                            tokio::time::sleep(Duration::from_millis(fabric.config.poll_interval_ms)).await;
                        }
                    }
                }
                tracing::debug!(queue = %queue, worker = worker_idx, "worker stopped");
            }));
        }

        WorkerHandle {
            queue: queue.to_string(),
            stop_tx,
            handles,
        }
    }

    async fn acquire(&self, queue: &str) -> Result<Option<String>, redis::RedisError> {
        let waiting = self.waiting_key(queue);
        let active = self.active_key(queue);
        let deadline = Utc::now().timestamp_millis() + self.config.stall_timeout_ms as i64;
        self.redis
            .with_retry(|mut conn| {
                let waiting = waiting.clone();
                let active = active.clone();
                async move {
                    Script::new(ACQUIRE_SCRIPT)
                        .key(&waiting)
                        .key(&active)
                        .arg(deadline)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await
    }

    async fn process_one(&self, queue: &str, job_id: &str, handler: &dyn JobHandler) {
        let record = match self.load_record(queue, job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Data vanished (completed elsewhere or pruned); drop the
                // active marker.
                let _ = self.remove_active(queue, job_id).await;
                return;
            }
            Err(e) => {
                tracing::warn!(queue = %queue, job_id = %job_id, "failed to load job: {e}");
                return;
            }
        };

        let ctx = JobContext {
            id: record.id.clone(),
            queue: queue.to_string(),
            payload: record.payload.clone(),
            attempts_made: record.attempts_made,
            attempts: record.attempts,
        };

        let outcome = handler.handle(&ctx).await;

        let result = match outcome {
            Ok(()) => self.complete(queue, record).await,
            Err(JobError::Transient(err)) => self.retry_or_dead_letter(queue, record, err).await,
            Err(JobError::Terminal(err)) => {
                let mut record = record;
                record.attempts_made += 1;
                record.last_error = Some(err.to_string());
                self.dead_letter(queue, record).await
            }
        };

        if let Err(e) = result {
            tracing::error!(queue = %queue, job_id = %job_id, "failed to finalize job: {e}");
        }
    }

    async fn complete(&self, queue: &str, record: JobRecord) -> Result<(), redis::RedisError> {
        self.remove_active(queue, &record.id).await?;
        if record.remove_on_complete {
            self.redis.del(&self.data_key(queue, &record.id)).await?;
        } else {
            let mut record = record;
            record.attempts_made += 1;
            let raw = serde_json::to_string(&record).unwrap_or_default();
            self.redis
                .set_ex(&self.data_key(queue, &record.id), raw, 3_600)
                .await?;
        }
        metrics::counter!("jobs_processed_total", "queue" => queue.to_string()).increment(1);
        Ok(())
    }

    async fn retry_or_dead_letter(
        &self,
        queue: &str,
        mut record: JobRecord,
        err: anyhow::Error,
    ) -> Result<(), redis::RedisError> {
        let prior_attempts = record.attempts_made;
        record.attempts_made += 1;
        record.last_error = Some(err.to_string());

        if record.attempts_made < record.attempts {
            let delay = record.backoff.delay_ms(prior_attempts);
            tracing::warn!(
                queue = %queue,
                job_id = %record.id,
                attempt = record.attempts_made,
                attempts = record.attempts,
                delay_ms = delay,
                "job failed, retrying: {err:#}"
            );
            let raw = serde_json::to_string(&record).unwrap_or_default();
            let data_key = self.data_key(queue, &record.id);
            let delayed = self.delayed_key(queue);
            let active = self.active_key(queue);
            let ready_at = Utc::now().timestamp_millis() + delay as i64;
            let id = record.id.clone();
            self.redis
                .with_retry(|mut conn| {
                    let raw = raw.clone();
                    let data_key = data_key.clone();
                    let delayed = delayed.clone();
                    let active = active.clone();
                    let id = id.clone();
                    async move {
                        redis::pipe()
                            .atomic()
                            .set(&data_key, &raw)
                            .ignore()
                            .zrem(&active, &id)
                            .ignore()
                            .zadd(&delayed, &id, ready_at)
                            .ignore()
                            .query_async::<_, ()>(&mut conn)
                            .await
                    }
                })
                .await?;
            metrics::counter!("jobs_retried_total", "queue" => queue.to_string()).increment(1);
            Ok(())
        } else {
            tracing::error!(
                queue = %queue,
                job_id = %record.id,
                attempts = record.attempts,
                "job exhausted attempts, dead-lettering: {err:#}"
            );
            self.dead_letter(queue, record).await
        }
    }

    /// Push the record onto the queue's dead-letter list (payload
    /// preserved) and clear every trace of the live job. The data key must
    /// go too: it doubles as the job-id dedupe guard, and a retained key
    /// would block resubmitting the same deterministic id.
    async fn dead_letter(&self, queue: &str, record: JobRecord) -> Result<(), redis::RedisError> {
        let raw = serde_json::to_string(&record).unwrap_or_default();
        let dlq = self.dlq_key(queue);
        let active = self.active_key(queue);
        let waiting = self.waiting_key(queue);
        let data_key = self.data_key(queue, &record.id);
        let id = record.id.clone();

        self.redis
            .with_retry(|mut conn| {
                let raw = raw.clone();
                let dlq = dlq.clone();
                let active = active.clone();
                let waiting = waiting.clone();
                let data_key = data_key.clone();
                let id = id.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .lpush(&dlq, &raw)
                        .ignore()
                        .zrem(&active, &id)
                        .ignore()
                        .zrem(&waiting, &id)
                        .ignore()
                        .del(&data_key)
                        .ignore()
                        .query_async::<_, ()>(&mut conn)
                        .await
                }
            })
            .await?;
        metrics::counter!("jobs_dead_lettered_total", "queue" => queue.to_string()).increment(1);
        Ok(())
    }

    async fn run_maintenance(&self, queue: &str) -> Result<(), redis::RedisError> {
        let now_ms = Utc::now().timestamp_millis();
        let delayed = self.delayed_key(queue);
        let waiting = self.waiting_key(queue);
        let active = self.active_key(queue);
        let prefix = self.data_prefix(queue);

        let _promoted: i32 = self
            .redis
            .with_retry(|mut conn| {
                let delayed = delayed.clone();
                let waiting = waiting.clone();
                let prefix = prefix.clone();
                async move {
                    Script::new(PROMOTE_SCRIPT)
                        .key(&delayed)
                        .key(&waiting)
                        .arg(now_ms)
                        .arg(100)
                        .arg(&prefix)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        let stalled: Vec<String> = self
            .redis
            .with_retry(|mut conn| {
                let active = active.clone();
                let waiting = waiting.clone();
                let prefix = prefix.clone();
                async move {
                    Script::new(REAP_SCRIPT)
                        .key(&active)
                        .key(&waiting)
                        .arg(now_ms)
                        .arg(100)
                        .arg(&prefix)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        for job_id in stalled {
            metrics::counter!("jobs_stalled_total", "queue" => queue.to_string()).increment(1);
            match self.load_record(queue, &job_id).await {
                Ok(Some(mut record)) => {
                    record.stalls += 1;
                    if record.stalls > self.config.max_stalls {
                        tracing::error!(
                            queue = %queue,
                            job_id = %job_id,
                            stalls = record.stalls,
                            "job exceeded stall budget, dead-lettering"
                        );
                        record.last_error = Some("stalled too many times".to_string());
                        self.dead_letter(queue, record).await?;
                    } else {
                        tracing::warn!(
                            queue = %queue,
                            job_id = %job_id,
                            stalls = record.stalls,
                            "stalled job returned to queue"
                        );
                        let raw = serde_json::to_string(&record).unwrap_or_default();
                        self.redis
                            .with_retry(|mut conn| {
                                let key = self.data_key(queue, &job_id);
                                let raw = raw.clone();
                                async move {
                                    redis::cmd("SET")
                                        .arg(&key)
                                        .arg(&raw)
                                        .query_async::<_, ()>(&mut conn)
                                        .await
                                }
                            })
                            .await?;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(queue = %queue, job_id = %job_id, "failed to load stalled job: {e}");
                }
            }
        }

        Ok(())
    }

    async fn load_record(
        &self,
        queue: &str,
        job_id: &str,
    ) -> Result<Option<JobRecord>, redis::RedisError> {
        let raw: Option<String> = self.redis.get(&self.data_key(queue, job_id)).await?;
        match raw {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                redis::RedisError::from((redis::ErrorKind::TypeError, "job decode", e.to_string()))
            }),
            None => Ok(None),
        }
    }

    async fn remove_active(&self, queue: &str, job_id: &str) -> Result<(), redis::RedisError> {
        self.redis.zrem(&self.active_key(queue), job_id).await?;
        Ok(())
    }

    /// Peek the dead-letter list, newest first. Payloads are preserved for
    /// replay tooling.
    pub async fn dead_letters(
        &self,
        queue: &str,
        limit: isize,
    ) -> Result<Vec<JobRecord>, redis::RedisError> {
        let dlq = self.dlq_key(queue);
        let raw: Vec<String> = self
            .redis
            .with_retry(|mut conn| {
                let dlq = dlq.clone();
                async move {
                    redis::cmd("LRANGE")
                        .arg(&dlq)
                        .arg(0)
                        .arg(limit - 1)
                        .query_async(&mut conn)
                        .await
                }
            })
            .await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::BackoffPolicy;

    #[test]
    fn job_record_round_trips_through_json() {
        let record = JobRecord {
            id: "match-abc".to_string(),
            queue: "matching".to_string(),
            payload: serde_json::json!({"order_id": "abc"}),
            attempts: 5,
            attempts_made: 2,
            stalls: 1,
            priority: 5,
            pri_score: 5e12 + 17.0,
            backoff: BackoffPolicy::exponential(2_000),
            remove_on_complete: true,
            remove_on_fail: false,
            submitted_at_ms: 1_700_000_000_000,
            last_error: Some("boom".to_string()),
        };
        let raw = serde_json::to_string(&record).unwrap();
        let parsed: JobRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.attempts_made, 2);
        assert_eq!(parsed.pri_score, record.pri_score);
        assert_eq!(parsed.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn priority_scores_keep_fifo_within_priority() {
        // Lower priority value must dominate any sequence distance.
        let market = 1.0 * 1e12 + 999_999.0;
        let limit = 5.0 * 1e12 + 1.0;
        assert!(market < limit);
        // FIFO within equal priority.
        let first = 5.0 * 1e12 + 10.0;
        let second = 5.0 * 1e12 + 11.0;
        assert!(first < second);
    }

    #[tokio::test]
    async fn token_bucket_enforces_rate() {
        let bucket = TokenBucket::new(1000);
        let start = Instant::now();
        for _ in 0..10 {
            bucket.acquire().await;
        }
        // 10 tokens out of an initially full 1000-token bucket must not block.
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
