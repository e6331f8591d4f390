//! Job table entries and their overlap guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use modhost_protocols::{JobHandler, ScheduleSpec};

use crate::schedule::Schedule;

/// Resolves the handler for a job at run time.
///
/// Resolution happens on every run, so a higher-priority handler registered
/// after the job is picked up without re-registering.
pub trait JobResolver: Send + Sync {
    fn resolve(&self, job_name: &str) -> Option<Arc<dyn JobHandler>>;
}

/// Request to add a job to the scheduler.
#[derive(Debug, Clone)]
pub struct JobRegistration {
    pub name: String,
    pub schedule: ScheduleSpec,
    /// Module that owns the job.
    pub owner: String,
}

impl JobRegistration {
    pub fn new(name: impl Into<String>, schedule: ScheduleSpec) -> Self {
        Self {
            name: name.into(),
            schedule,
            owner: String::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub schedule: String,
    pub owner: String,
    pub last_run: Option<DateTime<Utc>>,
    pub running: bool,
    pub paused: bool,
    pub run_count: u64,
}

/// Result of a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Completed,
    Failed,
    /// A run was already in flight; nothing was started.
    AlreadyRunning,
}

pub(crate) struct ScheduledJob {
    pub(crate) name: String,
    pub(crate) owner: String,
    pub(crate) schedule: Schedule,
    pub(crate) resolver: Arc<dyn JobResolver>,
    /// Overlap guard, shared by every registration of the same job name.
    running: Arc<AtomicBool>,
    pub(crate) paused: AtomicBool,
    /// When the schedule last fired; guards the per-minute window.
    pub(crate) last_fired: Mutex<Option<DateTime<Utc>>>,
    last_run: Mutex<Option<DateTime<Utc>>>,
    run_count: AtomicU64,
}

impl ScheduledJob {
    pub(crate) fn new(
        registration: JobRegistration,
        schedule: Schedule,
        resolver: Arc<dyn JobResolver>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: registration.name,
            owner: registration.owner,
            schedule,
            resolver,
            running,
            paused: AtomicBool::new(false),
            last_fired: Mutex::new(None),
            last_run: Mutex::new(None),
            run_count: AtomicU64::new(0),
        }
    }

    /// Claim the overlap guard. `None` if a run is already in flight.
    pub(crate) fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                job: Arc::clone(self),
            })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }

    pub(crate) fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            name: self.name.clone(),
            schedule: self.schedule.to_string(),
            owner: self.owner.clone(),
            last_run: self.last_run(),
            running: self.is_running(),
            paused: self.paused.load(Ordering::Acquire),
            run_count: self.run_count.load(Ordering::Relaxed),
        }
    }
}

/// Held for the duration of one run. Dropping it records the run and
/// releases the overlap guard, whatever the outcome.
pub(crate) struct RunGuard {
    job: Arc<ScheduledJob>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.job.last_run.lock() = Some(Utc::now());
        self.job.run_count.fetch_add(1, Ordering::Relaxed);
        self.job.running.store(false, Ordering::Release);
    }
}
