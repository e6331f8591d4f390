//! The job scheduler and its timing loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use modhost_protocols::event::topics;
use modhost_protocols::{EventEnvelope, EventPublisher, HandlerError, JobContext, TraceContext};

use crate::error::SchedulerError;
use crate::job::{JobDescriptor, JobRegistration, JobResolver, RunGuard, ScheduledJob, TriggerOutcome};
use crate::schedule::Schedule;

const SOURCE_ID: &str = "Scheduler";

/// Scheduler timing configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between schedule evaluations.
    pub tick: Duration,
    /// Wake on tick boundaries measured from the top of the minute.
    pub align_to_minute: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            align_to_minute: true,
        }
    }
}

/// Runs registered jobs on their schedules, one run per job at a time.
pub struct JobScheduler {
    jobs: DashMap<String, Arc<ScheduledJob>>,
    /// Overlap flags by job name. They outlive a replaced or deregistered
    /// entry while its run is still in flight.
    guards: DashMap<String, Arc<AtomicBool>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            guards: DashMap::new(),
            events: None,
            config,
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Report job outcomes on this publisher.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Add a job. A job with the same name is replaced; a run of the old
    /// entry still counts against the overlap guard of the new one.
    pub fn register_job(
        &self,
        registration: JobRegistration,
        resolver: Arc<dyn JobResolver>,
    ) -> Result<(), SchedulerError> {
        let schedule =
            Schedule::from_spec(&registration.schedule).map_err(|source| {
                SchedulerError::InvalidSchedule {
                    job: registration.name.clone(),
                    source,
                }
            })?;

        let name = registration.name.clone();
        info!(job = %name, schedule = %schedule, owner = %registration.owner, "Job registered");
        let running = self.guards.entry(name.clone()).or_default().clone();
        let job = ScheduledJob::new(registration, schedule, resolver, running);
        if let Some(previous) = self.jobs.get(&name) {
            *job.last_fired.lock() = *previous.last_fired.lock();
        }
        self.jobs.insert(name, Arc::new(job));
        Ok(())
    }

    /// Remove a job. An in-flight run completes normally.
    pub fn deregister_job(&self, name: &str) -> bool {
        let removed = self.jobs.remove(name).is_some();
        self.forget_guard(name);
        if removed {
            info!(job = %name, "Job deregistered");
        }
        removed
    }

    /// Remove every job owned by `owner`, returning how many were removed.
    pub fn deregister_owner(&self, owner: &str) -> usize {
        let names: Vec<String> = self
            .jobs
            .iter()
            .filter(|job| job.owner == owner)
            .map(|job| job.key().clone())
            .collect();
        let mut removed = 0;
        for name in names {
            if self.jobs.remove_if(&name, |_, job| job.owner == owner).is_some() {
                self.forget_guard(&name);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(owner = %owner, removed, "Jobs deregistered for owner");
        }
        removed
    }

    /// Drop an idle guard once no job of that name is registered.
    fn forget_guard(&self, name: &str) {
        if self.jobs.contains_key(name) {
            return;
        }
        self.guards
            .remove_if(name, |_, running| !running.load(Ordering::Acquire));
    }

    pub fn pause(&self, name: &str) -> Result<(), SchedulerError> {
        self.job(name)?.paused.store(true, Ordering::Release);
        debug!(job = %name, "Job paused");
        Ok(())
    }

    pub fn resume(&self, name: &str) -> Result<(), SchedulerError> {
        self.job(name)?.paused.store(false, Ordering::Release);
        debug!(job = %name, "Job resumed");
        Ok(())
    }

    pub fn get_job(&self, name: &str) -> Option<JobDescriptor> {
        self.jobs.get(name).map(|job| job.descriptor())
    }

    /// All jobs, sorted by name.
    pub fn list_jobs(&self) -> Vec<JobDescriptor> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|job| job.descriptor()).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Evaluate every job against `now` and start the due ones.
    ///
    /// Returns the names of the jobs started, sorted. Runs are spawned, so a
    /// slow job never delays the others or the next tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let snapshot: Vec<Arc<ScheduledJob>> =
            self.jobs.iter().map(|job| Arc::clone(job.value())).collect();

        let mut fired = Vec::new();
        for job in snapshot {
            if job.paused.load(Ordering::Acquire) {
                continue;
            }

            // Check, claim and mark under one lock so a re-entered tick
            // cannot fire the same window twice.
            let guard = {
                let mut last_fired = job.last_fired.lock();
                if !job.schedule.is_due(&now, last_fired.as_ref()) {
                    continue;
                }
                let Some(guard) = job.try_begin() else {
                    debug!(job = %job.name, "Job still running, skipping tick");
                    continue;
                };
                *last_fired = Some(now);
                guard
            };

            fired.push(job.name.clone());
            tokio::spawn(execute(
                job,
                guard,
                self.events.clone(),
                self.cancel.child_token(),
            ));
        }

        fired.sort();
        fired
    }

    /// Run a job now, ignoring its schedule and pause state.
    ///
    /// Respects the overlap guard: if the job is already running this is a
    /// no-op returning [`TriggerOutcome::AlreadyRunning`].
    pub async fn trigger(&self, name: &str) -> Result<TriggerOutcome, SchedulerError> {
        let job = self.job(name)?;
        let Some(guard) = job.try_begin() else {
            debug!(job = %name, "Trigger ignored, job already running");
            return Ok(TriggerOutcome::AlreadyRunning);
        };

        Ok(execute(job, guard, self.events.clone(), self.cancel.child_token()).await)
    }

    /// Spawn the timing loop.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut handle = self.loop_handle.lock();
        if handle.is_some() || self.cancel.is_cancelled() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let scheduler = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { scheduler.run().await }));
        Ok(())
    }

    /// Stop the loop and signal cancellation to running jobs.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Scheduler loop ended abnormally: {}", e);
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.loop_handle.lock().is_some() && !self.cancel.is_cancelled()
    }

    /// Time until the next tick.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        let tick = self.config.tick.max(Duration::from_secs(1));
        if !self.config.align_to_minute {
            return tick;
        }

        let into_minute = u64::from(now.second()) * 1000
            + u64::from(now.nanosecond().min(999_999_999)) / 1_000_000;
        let tick_ms = tick.as_millis().max(1) as u64;
        let remaining = tick_ms - (into_minute % tick_ms);
        Duration::from_millis(remaining.max(1))
    }

    async fn run(&self) {
        info!(tick = ?self.config.tick, jobs = self.jobs.len(), "Scheduler loop started");
        loop {
            let delay = self.next_delay(Utc::now());
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    let fired = self.tick(Utc::now());
                    if !fired.is_empty() {
                        debug!(?fired, "Scheduler tick");
                    }
                }
            }
        }
        info!("Scheduler loop stopped");
    }

    fn job(&self, name: &str) -> Result<Arc<ScheduledJob>, SchedulerError> {
        self.jobs
            .get(name)
            .map(|job| Arc::clone(job.value()))
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

async fn execute(
    job: Arc<ScheduledJob>,
    guard: RunGuard,
    events: Option<Arc<dyn EventPublisher>>,
    cancellation: CancellationToken,
) -> TriggerOutcome {
    let ctx = JobContext {
        job_name: job.name.clone(),
        trace: TraceContext::new(),
        last_run: job.last_run(),
        cancellation,
    };
    let trace_id = ctx.trace.trace_id;
    let started = Instant::now();

    let result = match job.resolver.resolve(&job.name) {
        None => Err("no handler registered".to_string()),
        Some(handler) => match AssertUnwindSafe(handler.execute(&ctx)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(HandlerError::from_panic(payload).to_string()),
        },
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    drop(guard);

    let (outcome, event) = match result {
        Ok(()) => {
            info!(job = %job.name, %trace_id, duration_ms, "Job completed");
            (
                TriggerOutcome::Completed,
                EventEnvelope::new(topics::JOB_COMPLETED, SOURCE_ID),
            )
        }
        Err(error) => {
            warn!(job = %job.name, %trace_id, duration_ms, %error, "Job failed");
            (
                TriggerOutcome::Failed,
                EventEnvelope::new(topics::JOB_FAILED, SOURCE_ID).with_data("error", error),
            )
        }
    };

    if let Some(events) = events {
        let event = event
            .with_data("job", job.name.clone())
            .with_data("trace_id", trace_id.to_string())
            .with_data("duration_ms", duration_ms)
            .with_trace_id(trace_id);
        events.publish(event).await;
    }

    outcome
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
