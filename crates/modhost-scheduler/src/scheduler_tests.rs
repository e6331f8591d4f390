use super::*;

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;

use async_trait::async_trait;
use chrono::TimeZone;
use modhost_protocols::{JobHandler, ScheduleSpec, job_fn};
use tokio::sync::Notify;

struct MapResolver(HashMap<String, Arc<dyn JobHandler>>);

impl MapResolver {
    fn single(name: &str, handler: Arc<dyn JobHandler>) -> Arc<Self> {
        Arc::new(Self(HashMap::from([(name.to_string(), handler)])))
    }
}

impl JobResolver for MapResolver {
    fn resolve(&self, job_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.0.get(job_name).cloned()
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: parking_lot::Mutex<Vec<EventEnvelope>>,
}

impl RecordingPublisher {
    fn topics(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.topic.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: EventEnvelope) {
        self.events.lock().push(event);
    }
}

fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn JobHandler> {
    job_fn(move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Handler that blocks until released, for overlap tests.
fn gated_handler(started: Arc<Notify>, release: Arc<Notify>, runs: Arc<AtomicUsize>) -> Arc<dyn JobHandler> {
    job_fn(move |_ctx| {
        let started = started.clone();
        let release = release.clone();
        let runs = runs.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            started.notify_one();
            release.notified().await;
            Ok(())
        }
    })
}

fn minute(m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 12, m, s).unwrap()
}

async fn wait_idle(scheduler: &JobScheduler, name: &str) {
    for _ in 0..200 {
        if scheduler.get_job(name).map(|j| !j.running && j.run_count > 0).unwrap_or(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never finished", name);
}

#[test]
fn test_register_and_list() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(
            JobRegistration::new("B", ScheduleSpec::cron("0 * * * *")).with_owner("m1"),
            MapResolver::single("B", counting_handler(counter.clone())),
        )
        .unwrap();
    scheduler
        .register_job(
            JobRegistration::new("A", ScheduleSpec::every(Duration::from_secs(300))),
            MapResolver::single("A", counting_handler(counter)),
        )
        .unwrap();

    let jobs = scheduler.list_jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].name, "A");
    assert_eq!(jobs[0].schedule, "every 300s");
    assert_eq!(jobs[1].owner, "m1");
    assert!(!jobs[1].running);
}

#[test]
fn test_register_invalid_schedule() {
    let scheduler = JobScheduler::default();
    let result = scheduler.register_job(
        JobRegistration::new("Bad", ScheduleSpec::cron("* * *")),
        Arc::new(MapResolver(HashMap::new())),
    );
    assert!(matches!(result, Err(SchedulerError::InvalidSchedule { .. })));
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_tick_fires_once_per_minute() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(
            JobRegistration::new("Every", ScheduleSpec::cron("* * * * *")),
            MapResolver::single("Every", counting_handler(counter.clone())),
        )
        .unwrap();

    assert_eq!(scheduler.tick(minute(0, 0)), vec!["Every".to_string()]);
    wait_idle(&scheduler, "Every").await;

    // Loop re-entered early in the same minute.
    assert!(scheduler.tick(minute(0, 30)).is_empty());
    assert!(scheduler.tick(minute(0, 59)).is_empty());

    assert_eq!(scheduler.tick(minute(1, 0)).len(), 1);
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_tick_skips_non_matching_and_paused() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(
            JobRegistration::new("Quarter", ScheduleSpec::cron("*/15 * * * *")),
            MapResolver::single("Quarter", counting_handler(counter.clone())),
        )
        .unwrap();

    assert!(scheduler.tick(minute(7, 0)).is_empty());

    scheduler.pause("Quarter").unwrap();
    assert!(scheduler.get_job("Quarter").unwrap().paused);
    assert!(scheduler.tick(minute(15, 0)).is_empty());

    scheduler.resume("Quarter").unwrap();
    assert_eq!(scheduler.tick(minute(15, 0)).len(), 1);
}

#[tokio::test]
async fn test_tick_skips_running_job() {
    let scheduler = JobScheduler::default();
    let (started, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(
            JobRegistration::new("Slow", ScheduleSpec::cron("* * * * *")),
            MapResolver::single("Slow", gated_handler(started.clone(), release.clone(), runs.clone())),
        )
        .unwrap();

    assert_eq!(scheduler.tick(minute(0, 0)).len(), 1);
    started.notified().await;

    // Next minute is due, but the previous run is still in flight.
    assert!(scheduler.tick(minute(1, 0)).is_empty());

    release.notify_one();
    wait_idle(&scheduler, "Slow").await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_trigger_unknown_job() {
    let scheduler = JobScheduler::default();
    assert!(matches!(
        scheduler.trigger("Missing").await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert!(scheduler.pause("Missing").is_err());
    assert!(scheduler.resume("Missing").is_err());
}

#[tokio::test]
async fn test_trigger_runs_even_when_paused() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(
            JobRegistration::new("Manual", ScheduleSpec::cron("0 0 1 1 *")),
            MapResolver::single("Manual", counting_handler(counter.clone())),
        )
        .unwrap();
    scheduler.pause("Manual").unwrap();

    let outcome = scheduler.trigger("Manual").await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Completed);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let desc = scheduler.get_job("Manual").unwrap();
    assert!(desc.last_run.is_some());
    assert!(!desc.running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_are_idempotent() {
    let scheduler = Arc::new(JobScheduler::default());
    let (started, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .register_job(
            JobRegistration::new("Once", ScheduleSpec::cron("0 0 1 1 *")),
            MapResolver::single("Once", gated_handler(started.clone(), release.clone(), runs.clone())),
        )
        .unwrap();

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("Once").await })
    };
    started.notified().await;

    let mut others = Vec::new();
    for _ in 0..8 {
        let scheduler = scheduler.clone();
        others.push(tokio::spawn(async move { scheduler.trigger("Once").await }));
    }
    for handle in others {
        assert_eq!(handle.await.unwrap().unwrap(), TriggerOutcome::AlreadyRunning);
    }

    release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), TriggerOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reregistration_keeps_overlap_guard() {
    let scheduler = Arc::new(JobScheduler::default());
    let (started, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    let resolver = MapResolver::single("J", gated_handler(started.clone(), release.clone(), runs.clone()));
    scheduler
        .register_job(
            JobRegistration::new("J", ScheduleSpec::cron("0 0 1 1 *")).with_owner("a"),
            resolver.clone(),
        )
        .unwrap();

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("J").await })
    };
    started.notified().await;

    // Another module declaring the same job replaces the entry mid-run.
    scheduler
        .register_job(
            JobRegistration::new("J", ScheduleSpec::cron("0 0 1 1 *")).with_owner("b"),
            resolver.clone(),
        )
        .unwrap();
    assert_eq!(scheduler.trigger("J").await.unwrap(), TriggerOutcome::AlreadyRunning);
    assert!(scheduler.get_job("J").unwrap().running);

    // Handover: the owner goes away and the job is scheduled again.
    assert_eq!(scheduler.deregister_owner("b"), 1);
    scheduler
        .register_job(
            JobRegistration::new("J", ScheduleSpec::cron("0 0 1 1 *")).with_owner("c"),
            resolver,
        )
        .unwrap();
    assert_eq!(scheduler.trigger("J").await.unwrap(), TriggerOutcome::AlreadyRunning);

    release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), TriggerOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    release.notify_one();
    assert_eq!(scheduler.trigger("J").await.unwrap(), TriggerOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_job_outcomes_are_published() {
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = JobScheduler::default().with_events(publisher.clone());

    let ok = job_fn(|_| async { Ok(()) });
    let failing = job_fn(|_| async { Err(HandlerError::Custom("disk full".into())) });
    let resolver = Arc::new(MapResolver(HashMap::from([
        ("Ok".to_string(), ok),
        ("Failing".to_string(), failing),
    ])));

    for name in ["Ok", "Failing", "Orphan"] {
        scheduler
            .register_job(
                JobRegistration::new(name, ScheduleSpec::cron("* * * * *")),
                resolver.clone(),
            )
            .unwrap();
    }

    assert_eq!(scheduler.trigger("Ok").await.unwrap(), TriggerOutcome::Completed);
    assert_eq!(scheduler.trigger("Failing").await.unwrap(), TriggerOutcome::Failed);
    assert_eq!(scheduler.trigger("Orphan").await.unwrap(), TriggerOutcome::Failed);

    assert_eq!(
        publisher.topics(),
        vec![topics::JOB_COMPLETED, topics::JOB_FAILED, topics::JOB_FAILED]
    );

    let events = publisher.events.lock();
    assert_eq!(events[1].get("error").and_then(|v| v.as_str()), Some("disk full"));
    assert_eq!(
        events[2].get("error").and_then(|v| v.as_str()),
        Some("no handler registered")
    );
    assert_eq!(events[0].get("job").and_then(|v| v.as_str()), Some("Ok"));
    assert!(events[0].trace_id.is_some());
    assert_ne!(events[0].trace_id, events[1].trace_id);
}

#[tokio::test]
async fn test_panicking_job_is_contained() {
    let scheduler = JobScheduler::default();
    let panicking = job_fn(|ctx: JobContext| async move {
        if ctx.job_name == "Boom" {
            panic!("job exploded");
        }
        Ok(())
    });
    scheduler
        .register_job(
            JobRegistration::new("Boom", ScheduleSpec::cron("* * * * *")),
            MapResolver::single("Boom", panicking),
        )
        .unwrap();

    assert_eq!(scheduler.trigger("Boom").await.unwrap(), TriggerOutcome::Failed);
    let desc = scheduler.get_job("Boom").unwrap();
    assert!(!desc.running);
    assert_eq!(desc.run_count, 1);

    // Guard released: a second run is possible.
    assert_eq!(scheduler.trigger("Boom").await.unwrap(), TriggerOutcome::Failed);
}

#[tokio::test]
async fn test_deregister() {
    let scheduler = JobScheduler::default();
    let resolver = Arc::new(MapResolver(HashMap::new()));
    for (name, owner) in [("a", "m1"), ("b", "m1"), ("c", "m2")] {
        scheduler
            .register_job(
                JobRegistration::new(name, ScheduleSpec::cron("* * * * *")).with_owner(owner),
                resolver.clone(),
            )
            .unwrap();
    }

    assert!(scheduler.deregister_job("c"));
    assert!(!scheduler.deregister_job("c"));
    assert_eq!(scheduler.deregister_owner("m1"), 2);
    assert!(scheduler.is_empty());
}

#[test]
fn test_next_delay_aligns_to_minute() {
    let scheduler = JobScheduler::default();
    assert_eq!(scheduler.next_delay(minute(5, 0)), Duration::from_secs(60));
    assert_eq!(scheduler.next_delay(minute(5, 45)), Duration::from_secs(15));

    let unaligned = JobScheduler::new(SchedulerConfig {
        tick: Duration::from_secs(60),
        align_to_minute: false,
    });
    assert_eq!(unaligned.next_delay(minute(5, 45)), Duration::from_secs(60));

    let fast = JobScheduler::new(SchedulerConfig {
        tick: Duration::from_secs(15),
        align_to_minute: true,
    });
    assert_eq!(fast.next_delay(minute(5, 20)), Duration::from_secs(10));
}

#[tokio::test]
async fn test_start_and_stop_loop() {
    let scheduler = Arc::new(JobScheduler::default());
    scheduler.start().unwrap();
    assert!(scheduler.is_started());
    assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));

    scheduler.stop().await;
    assert!(!scheduler.is_started());
}
