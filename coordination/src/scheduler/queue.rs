//! The job queue: admission, pump, completion and retry timers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::admission::EnqueueRequest;
use super::lanes::{Candidate, PriorityLanes};
use super::memory::{has_headroom, MemoryProbe, SystemMemory};
use super::metrics::QueueHealthMetrics;
use super::retry::{FailureDecision, RetryPolicy};
use super::{QueueError, QueueResult};
use crate::config::{QueueConfig, SettingsProvider};
use crate::events::{EventBus, EventBusExt, EventFilter, FilteredReceiver, QueueEvent, SharedEventBus};
use crate::pipeline::{JobContext, PipelineError, PipelineRunner, ProgressSink};
use crate::state::{
    FinalResult, Job, JobId, JobStatus, MemoryJobStore, Priority, SessionId, SharedJobStore,
};

/// How long admission waits before re-checking a memory gate or deferred-only lanes
const DEFAULT_REPUMP_INTERVAL: Duration = Duration::from_millis(500);

/// Mutable queue state; only touched while holding the queue mutex
struct QueueState {
    jobs: HashMap<JobId, Job>,
    lanes: PriorityLanes,
    idempotency: HashMap<(SessionId, String), JobId>,
    /// Dedupe hash of every queued or running job
    active_hashes: HashMap<String, JobId>,
    active_workers: usize,
    retry_timers: HashMap<JobId, JoinHandle<()>>,
    cancel_tokens: HashMap<JobId, CancellationToken>,
    dead_letters: Vec<JobId>,
    retries_scheduled: u64,
    repump_armed: bool,
}

impl QueueState {
    fn new(lanes: PriorityLanes) -> Self {
        Self {
            jobs: HashMap::new(),
            lanes,
            idempotency: HashMap::new(),
            active_hashes: HashMap::new(),
            active_workers: 0,
            retry_timers: HashMap::new(),
            cancel_tokens: HashMap::new(),
            dead_letters: Vec::new(),
            retries_scheduled: 0,
            repump_armed: false,
        }
    }

    fn release_hash(&mut self, job_id: &str, hash: &str) {
        if self.active_hashes.get(hash).is_some_and(|id| id == job_id) {
            self.active_hashes.remove(hash);
        }
    }

    fn cancel_retry_timer(&mut self, job_id: &str) {
        if let Some(timer) = self.retry_timers.remove(job_id) {
            timer.abort();
        }
    }
}

struct Inner {
    state: Mutex<QueueState>,
    runner: Arc<dyn PipelineRunner>,
    store: SharedJobStore,
    events: SharedEventBus,
    settings: Arc<dyn SettingsProvider>,
    memory: Arc<dyn MemoryProbe>,
    retry: RetryPolicy,
    default_max_retries: u32,
    min_free_memory_bytes: u64,
    repump_interval: Duration,
    handle: Handle,
    pumping: AtomicBool,
    pump_requested: AtomicBool,
}

/// Builder for [`JobQueue`]
pub struct JobQueueBuilder {
    config: QueueConfig,
    runner: Arc<dyn PipelineRunner>,
    store: Option<SharedJobStore>,
    events: Option<SharedEventBus>,
    settings: Option<Arc<dyn SettingsProvider>>,
    memory: Option<Arc<dyn MemoryProbe>>,
    repump_interval: Duration,
}

impl JobQueueBuilder {
    pub fn store(mut self, store: SharedJobStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Live settings polled on every pump; defaults to the static config
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(probe);
        self
    }

    pub fn repump_interval(mut self, interval: Duration) -> Self {
        self.repump_interval = interval;
        self
    }

    /// Build the queue. Must be called inside a tokio runtime.
    pub fn build(self) -> QueueResult<JobQueue> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let lanes = PriorityLanes::new(self.config.cycle()?);

        let inner = Inner {
            state: Mutex::new(QueueState::new(lanes)),
            runner: self.runner,
            store: self
                .store
                .unwrap_or_else(|| MemoryJobStore::new().shared()),
            events: self.events.unwrap_or_else(|| EventBus::new().shared()),
            settings: self
                .settings
                .unwrap_or_else(|| Arc::new(self.config.clone())),
            memory: self.memory.unwrap_or_else(|| Arc::new(SystemMemory)),
            retry: RetryPolicy::new(Duration::from_millis(self.config.base_retry_delay_ms)),
            default_max_retries: self.config.default_max_retries,
            min_free_memory_bytes: self.config.min_free_memory_bytes(),
            repump_interval: self.repump_interval,
            handle,
            pumping: AtomicBool::new(false),
            pump_requested: AtomicBool::new(false),
        };

        Ok(JobQueue {
            inner: Arc::new(inner),
        })
    }
}

/// In-process priority job queue
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn builder(config: QueueConfig, runner: Arc<dyn PipelineRunner>) -> JobQueueBuilder {
        JobQueueBuilder {
            config,
            runner,
            store: None,
            events: None,
            settings: None,
            memory: None,
            repump_interval: DEFAULT_REPUMP_INTERVAL,
        }
    }

    /// Admit a request, or return the existing job it duplicates.
    ///
    /// A repeat `(session_id, idempotency_key)` returns the job holding that
    /// key while it is queued, running or completed. A request whose content
    /// hash matches a queued or running job returns that job.
    pub fn enqueue(&self, request: EnqueueRequest) -> QueueResult<Job> {
        let job = {
            let mut guard = self.inner.lock()?;
            let state = &mut *guard;

            let index_key = request
                .idempotency_key
                .clone()
                .map(|key| (request.session_id.clone(), key));

            if let Some(index_key) = &index_key {
                if let Some(existing_id) = state.idempotency.get(index_key).cloned() {
                    match state.jobs.get(&existing_id) {
                        Some(existing) if existing.status.holds_idempotency_key() => {
                            debug!(job_id = %existing.id, "Idempotent enqueue returned existing job");
                            return Ok(existing.clone());
                        }
                        _ => {
                            debug!(job_id = %existing_id, "Clearing stale idempotency entry");
                            state.idempotency.remove(index_key);
                        }
                    }
                }
            }

            let hash = request.content_hash();
            let merge_target = state
                .active_hashes
                .get(&hash)
                .filter(|id| state.jobs.get(*id).is_some_and(|job| job.status.is_active()))
                .cloned();
            if let Some(existing_id) = merge_target {
                let Some(existing) = state.jobs.get_mut(&existing_id) else {
                    return Err(QueueError::NotFound(existing_id));
                };
                if let Some(index_key) = index_key {
                    if existing.add_idempotency_alias(&index_key.1) {
                        self.inner.persist(existing);
                    }
                    state.idempotency.insert(index_key, existing_id.clone());
                }
                debug!(job_id = %existing.id, "Duplicate content merged into active job");
                return Ok(existing.clone());
            }

            let job = request.with_dedupe_hash(hash).into_job(self.inner.default_max_retries);
            if let Some(index_key) = index_key {
                state.idempotency.insert(index_key, job.id.clone());
            }
            state
                .active_hashes
                .insert(job.dedupe_hash.clone(), job.id.clone());
            state.lanes.push(job.priority, job.id.clone());
            state.jobs.insert(job.id.clone(), job.clone());

            self.inner.persist(&job);
            self.inner.events.publish(QueueEvent::job_status(&job));
            info!(
                job_id = %job.id,
                session_id = %job.session_id,
                priority = %job.priority,
                mode = %job.mode,
                "Job enqueued"
            );
            job
        };

        self.inner.pump();
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        Ok(self.inner.lock()?.jobs.get(job_id).cloned())
    }

    /// Every job, oldest first
    pub fn get_all_jobs(&self) -> QueueResult<Vec<Job>> {
        let state = self.inner.lock()?;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Jobs that exhausted their retries, in the order they died
    pub fn dead_letters(&self) -> QueueResult<Vec<Job>> {
        let state = self.inner.lock()?;
        Ok(state
            .dead_letters
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect())
    }

    /// Cancel a queued or running job.
    ///
    /// A queued job is removed before it starts. A running job is marked
    /// cancelled and its token fired; its eventual result is discarded.
    pub fn cancel_job(&self, job_id: &str) -> QueueResult<Job> {
        let mut guard = self.inner.lock()?;
        let state = &mut *guard;

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let from = job.status;
        if !job.transition(JobStatus::Cancelled) {
            return Err(QueueError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to: JobStatus::Cancelled,
            });
        }
        job.completed_at = Some(Utc::now());
        job.next_retry_at = None;
        let job = job.clone();

        state.lanes.remove(job_id);
        state.cancel_retry_timer(job_id);
        if let Some(token) = state.cancel_tokens.get(job_id) {
            token.cancel();
        }
        state.release_hash(job_id, &job.dedupe_hash);

        self.inner.persist(&job);
        self.inner.events.publish(QueueEvent::job_status(&job));
        info!(job_id = %job.id, previous = %from, "Job cancelled");
        Ok(job)
    }

    pub fn get_queue_health_metrics(&self) -> QueueResult<QueueHealthMetrics> {
        let concurrency = self.inner.settings.settings().effective_concurrency();
        let state = self.inner.lock()?;
        let now = Utc::now();

        let retry_waiting = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.next_retry_at.is_some())
            .count();
        let oldest_queued_age_ms = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| j.created_at)
            .min()
            .map(|created| (now - created).num_milliseconds().max(0) as u64);

        Ok(QueueHealthMetrics {
            active_workers: state.active_workers,
            configured_concurrency: concurrency,
            queue_depth: state.lanes.total_depth() + retry_waiting,
            depth_high: state.lanes.depth(Priority::High),
            depth_normal: state.lanes.depth(Priority::Normal),
            depth_low: state.lanes.depth(Priority::Low),
            oldest_queued_age_ms,
            retry_waiting,
            retries_scheduled: state.retries_scheduled,
            dead_letter_count: state.dead_letters.len(),
        })
    }

    pub fn events(&self) -> SharedEventBus {
        Arc::clone(&self.inner.events)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        self.inner.events.subscribe_filtered(filter)
    }

    /// Rehydrate jobs from the store after a restart.
    ///
    /// Running jobs lost their executor and go back to the queue. Returns
    /// the number of jobs queued for execution.
    pub fn restore(&self) -> QueueResult<usize> {
        let jobs = self.inner.store.load_jobs()?;
        let now = Utc::now();
        let mut requeued = 0;

        {
            let mut guard = self.inner.lock()?;
            let state = &mut *guard;

            for mut job in jobs {
                if state.jobs.contains_key(&job.id) {
                    continue;
                }

                if job.status == JobStatus::Running {
                    job.transition(JobStatus::Queued);
                    job.started_at = None;
                    job.current_stage = None;
                    job.progress = 0;
                    self.inner.persist(&job);
                    info!(job_id = %job.id, "Requeued job interrupted by restart");
                }

                if job.status.holds_idempotency_key() {
                    for key in job.idempotency_keys() {
                        state
                            .idempotency
                            .insert((job.session_id.clone(), key.to_string()), job.id.clone());
                    }
                }

                match job.status {
                    JobStatus::Queued => {
                        state
                            .active_hashes
                            .insert(job.dedupe_hash.clone(), job.id.clone());
                        match job.next_retry_at {
                            Some(at) if at > now => {
                                let delay = (at - now).to_std().unwrap_or_default();
                                self.inner.arm_retry_timer(state, job.id.clone(), delay);
                            }
                            _ => {
                                job.next_retry_at = None;
                                state.lanes.push(job.priority, job.id.clone());
                            }
                        }
                        requeued += 1;
                    }
                    JobStatus::DeadLetter => state.dead_letters.push(job.id.clone()),
                    _ => {}
                }

                state.jobs.insert(job.id.clone(), job);
            }
        }

        info!(requeued, "Restored jobs from store");
        self.inner.pump();
        Ok(requeued)
    }
}

impl Inner {
    fn lock(&self) -> QueueResult<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| QueueError::LockPoisoned)
    }

    /// Persistence failures are logged; scheduling continues.
    fn persist(&self, job: &Job) {
        if let Err(e) = self.store.save_job(job) {
            error!(job_id = %job.id, error = %e, "Failed to persist job");
        }
    }

    /// Admit jobs until concurrency or memory is saturated.
    ///
    /// Only one pump runs at a time; a call while pumping makes the running
    /// pump take another pass instead.
    fn pump(self: &Arc<Self>) {
        self.pump_requested.store(true, Ordering::SeqCst);
        loop {
            if self
                .pumping
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            while self.pump_requested.swap(false, Ordering::AcqRel) {
                self.admit();
            }
            self.pumping.store(false, Ordering::Release);
            if !self.pump_requested.load(Ordering::Acquire) {
                return;
            }
        }
    }

    fn admit(self: &Arc<Self>) {
        let mut guard = match self.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!(error = %e, "Pump skipped");
                return;
            }
        };
        let state = &mut *guard;

        loop {
            let concurrency = self.settings.settings().effective_concurrency();
            if state.active_workers >= concurrency {
                debug!(active = state.active_workers, concurrency, "Concurrency saturated");
                return;
            }
            if state.lanes.is_empty() {
                return;
            }

            if !has_headroom(self.memory.as_ref(), self.min_free_memory_bytes) {
                warn!(
                    active = state.active_workers,
                    queued = state.lanes.total_depth(),
                    min_free_bytes = self.min_free_memory_bytes,
                    "Low host memory, pausing admission"
                );
                if state.active_workers == 0 {
                    self.arm_repump(state);
                }
                return;
            }

            let now = Utc::now();
            let jobs = &state.jobs;
            let next = state.lanes.dequeue(|id| match jobs.get(id) {
                Some(job) if job.status == JobStatus::Queued => {
                    if job.is_deferred(now) {
                        Candidate::Deferred
                    } else {
                        Candidate::Ready
                    }
                }
                _ => Candidate::Stale,
            });

            let Some(job_id) = next else {
                if !state.lanes.is_empty() {
                    debug!(queued = state.lanes.total_depth(), "Only deferred jobs queued");
                    self.arm_repump(state);
                }
                return;
            };

            self.start(state, &job_id);
        }
    }

    fn start(self: &Arc<Self>, state: &mut QueueState, job_id: &str) {
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        if !job.transition(JobStatus::Running) {
            return;
        }
        job.started_at = Some(Utc::now());
        job.next_retry_at = None;
        job.progress = 0;
        job.current_stage = None;
        let snapshot = job.clone();

        let token = CancellationToken::new();
        state.cancel_tokens.insert(job_id.to_string(), token.clone());
        state.active_workers += 1;

        self.persist(&snapshot);
        self.events.publish(QueueEvent::job_status(&snapshot));
        info!(
            job_id = %snapshot.id,
            priority = %snapshot.priority,
            attempt = snapshot.retry_count + 1,
            active = state.active_workers,
            "Job started"
        );

        let sink: Arc<dyn ProgressSink> = Arc::clone(self) as Arc<dyn ProgressSink>;
        let ctx = JobContext::new(&snapshot, Arc::clone(&self.events), token).with_progress_sink(sink);
        let inner = Arc::clone(self);
        let runner = Arc::clone(&self.runner);
        let id = snapshot.id.clone();

        self.handle.spawn(async move {
            // Run in a child task so a panicking runner still frees its slot
            let outcome = match inner
                .handle
                .spawn(async move { runner.run(snapshot, ctx).await })
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(PipelineError::Execution(format!("pipeline task failed: {}", e))),
            };
            inner.finish(&id, outcome);
            inner.pump();
        });
    }

    /// Apply an execution outcome. A job that is no longer running (cancelled
    /// meanwhile) keeps its status and the outcome is dropped.
    fn finish(self: &Arc<Self>, job_id: &str, outcome: Result<FinalResult, PipelineError>) {
        let mut guard = match self.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!(job_id, error = %e, "Could not record job outcome");
                return;
            }
        };
        let state = &mut *guard;
        state.active_workers = state.active_workers.saturating_sub(1);
        state.cancel_tokens.remove(job_id);

        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        if job.status != JobStatus::Running {
            info!(job_id, status = %job.status, "Discarding late result for job no longer running");
            return;
        }

        let now = Utc::now();
        match outcome {
            Ok(result) => {
                job.transition(JobStatus::Completed);
                job.completed_at = Some(now);
                job.progress = 100;
                job.error = None;
                job.result = Some(result.clone());
                let job = job.clone();
                state.release_hash(job_id, &job.dedupe_hash);

                self.persist(&job);
                self.events.publish(QueueEvent::job_status(&job));
                self.events.publish(QueueEvent::SwarmResult {
                    job_id: job.id.clone(),
                    session_id: job.session_id.clone(),
                    result,
                    timestamp: now,
                });
                info!(job_id, confidence = job.result.as_ref().map(|r| r.confidence), "Job completed");
            }
            Err(err) => {
                let message = err.to_string();
                match self.retry.decide(job, err.is_retryable()) {
                    FailureDecision::Retry { delay } => {
                        job.transition(JobStatus::Queued);
                        job.retry_count += 1;
                        job.error = Some(message.clone());
                        job.next_retry_at = chrono::Duration::from_std(delay)
                            .ok()
                            .map(|d| now + d);
                        let job = job.clone();
                        state.retries_scheduled += 1;

                        self.persist(&job);
                        self.events.publish(QueueEvent::job_status(&job));
                        let delay_ms = delay.as_millis() as u64;
                        self.events.publish(QueueEvent::RetryScheduled {
                            job_id: job.id.clone(),
                            session_id: job.session_id.clone(),
                            attempt: job.retry_count,
                            delay_ms,
                            timestamp: now,
                        });
                        warn!(
                            job_id,
                            retry = job.retry_count,
                            max_retries = job.max_retries,
                            delay_ms,
                            error = %message,
                            "Job failed, retry scheduled"
                        );
                        self.arm_retry_timer(state, job.id, delay);
                    }
                    decision => {
                        let dead_letter = decision == FailureDecision::DeadLetter;
                        let next = if dead_letter {
                            JobStatus::DeadLetter
                        } else {
                            JobStatus::Failed
                        };
                        job.transition(next);
                        job.completed_at = Some(now);
                        job.error = Some(message.clone());
                        let job = job.clone();
                        state.release_hash(job_id, &job.dedupe_hash);
                        if dead_letter {
                            state.dead_letters.push(job.id.clone());
                        }

                        self.persist(&job);
                        self.events.publish(QueueEvent::job_status(&job));
                        self.events.publish(QueueEvent::SwarmError {
                            job_id: job.id.clone(),
                            session_id: job.session_id.clone(),
                            error: message.clone(),
                            dead_letter,
                            timestamp: now,
                        });
                        error!(
                            job_id,
                            status = %job.status,
                            retries = job.retry_count,
                            error = %message,
                            "Job failed terminally"
                        );
                    }
                }
            }
        }
    }

    fn arm_retry_timer(self: &Arc<Self>, state: &mut QueueState, job_id: JobId, delay: Duration) {
        let inner = Arc::clone(self);
        let id = job_id.clone();
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_retry_due(&id);
        });
        if let Some(previous) = state.retry_timers.insert(job_id, timer) {
            previous.abort();
        }
    }

    /// Retry timer fired: put the job back in its lane if still queued.
    fn on_retry_due(self: &Arc<Self>, job_id: &str) {
        {
            let mut guard = match self.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    error!(job_id, error = %e, "Retry timer could not requeue job");
                    return;
                }
            };
            let state = &mut *guard;
            state.retry_timers.remove(job_id);

            let Some(job) = state.jobs.get_mut(job_id) else {
                return;
            };
            if job.status != JobStatus::Queued {
                debug!(job_id, status = %job.status, "Retry timer fired for job no longer queued");
                return;
            }
            job.next_retry_at = None;
            let (priority, snapshot) = (job.priority, job.clone());
            if !state.lanes.contains(job_id) {
                state.lanes.push(priority, job_id.to_string());
            }
            self.persist(&snapshot);
            debug!(job_id, "Retry backoff elapsed, job requeued");
        }
        self.pump();
    }

    /// Schedule one pump after the re-pump interval
    fn arm_repump(self: &Arc<Self>, state: &mut QueueState) {
        if state.repump_armed {
            return;
        }
        state.repump_armed = true;
        let inner = Arc::clone(self);
        let interval = self.repump_interval;
        self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            match inner.lock() {
                Ok(mut state) => state.repump_armed = false,
                Err(e) => {
                    error!(error = %e, "Delayed pump skipped");
                    return;
                }
            }
            inner.pump();
        });
    }
}

impl ProgressSink for Inner {
    fn update_progress(&self, job_id: &str, stage: &str, progress: u8) {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                error!(job_id, error = %e, "Progress update dropped");
                return;
            }
        };
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        if job.status != JobStatus::Running {
            return;
        }
        job.current_stage = Some(stage.to_string());
        job.progress = progress.min(100);
        let snapshot = job.clone();
        drop(state);

        // Not persisted: restore resets progress of interrupted jobs.
        self.events.publish(QueueEvent::job_status(&snapshot));
        debug!(job_id, stage, progress, "Job progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::memory::FixedMemory;
    use crate::state::JobMode;
    use async_trait::async_trait;

    /// Never finishes; keeps jobs running
    struct Stalled;

    #[async_trait]
    impl PipelineRunner for Stalled {
        async fn run(&self, _job: Job, ctx: JobContext) -> Result<FinalResult, PipelineError> {
            ctx.cancellation().cancelled().await;
            Err(PipelineError::Cancelled)
        }
    }

    fn queue(config: QueueConfig) -> JobQueue {
        JobQueue::builder(config, Arc::new(Stalled))
            .memory_probe(Arc::new(FixedMemory::new(u64::MAX)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = JobQueue::builder(QueueConfig::default(), Arc::new(Stalled)).build();
        assert!(matches!(result, Err(QueueError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_invalid_cycle_rejected() {
        let config = QueueConfig {
            service_cycle: vec![4],
            ..Default::default()
        };
        let result = JobQueue::builder(config, Arc::new(Stalled)).build();
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[tokio::test]
    async fn test_enqueue_starts_up_to_concurrency() {
        let queue = queue(QueueConfig::default());
        for i in 0..3 {
            queue
                .enqueue(EnqueueRequest::new("s1", format!("prompt {}", i), JobMode::Chat))
                .unwrap();
        }
        let metrics = queue.get_queue_health_metrics().unwrap();
        assert_eq!(metrics.active_workers, 2);
        assert_eq!(metrics.configured_concurrency, 2);
        assert_eq!(metrics.queue_depth, 1);
        assert_eq!(metrics.depth_normal, 1);
        assert!(metrics.oldest_queued_age_ms.is_some());
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let config = QueueConfig {
            max_concurrent_jobs: 1,
            ..Default::default()
        };
        let queue = queue(config);
        let first = queue
            .enqueue(EnqueueRequest::new("s1", "a", JobMode::Chat))
            .unwrap();
        let second = queue
            .enqueue(EnqueueRequest::new("s1", "b", JobMode::Chat))
            .unwrap();
        assert_eq!(queue.get_job(&first.id).unwrap().unwrap().status, JobStatus::Running);

        let cancelled = queue.cancel_job(&second.id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert_eq!(queue.get_queue_health_metrics().unwrap().queue_depth, 0);

        let again = queue.cancel_job(&second.id);
        assert!(matches!(again, Err(QueueError::InvalidTransition { .. })));
        assert!(matches!(queue.cancel_job("missing"), Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_live_concurrency_change() {
        let settings = crate::config::SharedSettings::new(crate::config::QueueSettings {
            max_concurrent_jobs: 1,
        });
        let queue = JobQueue::builder(QueueConfig::default(), Arc::new(Stalled))
            .memory_probe(Arc::new(FixedMemory::new(u64::MAX)))
            .settings(Arc::new(settings.clone()))
            .build()
            .unwrap();
        for i in 0..3 {
            queue
                .enqueue(EnqueueRequest::new("s1", format!("p{}", i), JobMode::Chat))
                .unwrap();
        }
        assert_eq!(queue.get_queue_health_metrics().unwrap().active_workers, 1);

        settings.set_max_concurrent_jobs(50);
        queue
            .enqueue(EnqueueRequest::new("s1", "p3", JobMode::Chat))
            .unwrap();
        let metrics = queue.get_queue_health_metrics().unwrap();
        assert_eq!(metrics.active_workers, 4);
        assert_eq!(metrics.configured_concurrency, 8);
    }
}
