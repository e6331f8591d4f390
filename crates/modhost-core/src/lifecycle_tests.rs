use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use modhost_scheduler::{JobScheduler, SchedulerConfig};

/// Records the global order in which hooks start and stop.
struct TestHook {
    name: String,
    priority: i32,
    clock: Arc<AtomicUsize>,
    started_at: AtomicUsize,
    stopped_at: AtomicUsize,
    stopped: AtomicBool,
}

impl TestHook {
    fn new(name: &str, priority: i32, clock: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.to_string(),
            priority,
            clock,
            started_at: AtomicUsize::new(0),
            stopped_at: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    fn tick(&self) -> usize {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait::async_trait]
impl LifecycleHook for TestHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self) -> Result<(), ModuleError> {
        self.started_at.store(self.tick(), Ordering::SeqCst);
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), ModuleError> {
        self.stopped_at.store(self.tick(), Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

struct FailingHook;

#[async_trait::async_trait]
impl LifecycleHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_start(&self) -> Result<(), ModuleError> {
        Err(ModuleError::InitializationFailed("Failed to start".to_string()))
    }

    async fn on_stop(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

struct SlowStopHook;

#[async_trait::async_trait]
impl LifecycleHook for SlowStopHook {
    fn name(&self) -> &str {
        "slow"
    }

    async fn on_start(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), ModuleError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[test]
fn test_kernel_state_conversion() {
    assert_eq!(KernelState::from(0), KernelState::Created);
    assert_eq!(KernelState::from(1), KernelState::Starting);
    assert_eq!(KernelState::from(2), KernelState::Running);
    assert_eq!(KernelState::from(3), KernelState::ShuttingDown);
    assert_eq!(KernelState::from(4), KernelState::Stopped);
    assert_eq!(KernelState::from(99), KernelState::Created);
    assert_eq!(KernelState::ShuttingDown.to_string(), "shutting down");
}

#[test]
fn test_shutdown_signal() {
    let signal = ShutdownSignal::default();
    let mut rx = signal.subscribe();
    signal.trigger();
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_lifecycle_start_stop() {
    let manager = LifecycleManager::default();
    let clock = Arc::new(AtomicUsize::new(0));
    let hook = Arc::new(TestHook::new("a", 0, clock));
    manager.register_hook(hook.clone()).await;

    assert_eq!(manager.state(), KernelState::Created);

    manager.start().await.unwrap();
    assert!(manager.is_running());
    assert_eq!(hook.started_at.load(Ordering::SeqCst), 1);

    let mut shutdown = manager.shutdown_signal().subscribe();
    manager.stop().await.unwrap();
    assert_eq!(manager.state(), KernelState::Stopped);
    assert!(hook.stopped.load(Ordering::SeqCst));
    assert!(shutdown.try_recv().is_ok());
}

#[tokio::test]
async fn test_cannot_start_twice_or_stop_before_start() {
    let manager = LifecycleManager::default();
    assert!(manager.stop().await.is_err());

    manager.start().await.unwrap();
    let err = manager.start().await.unwrap_err();
    assert!(err.to_string().contains("while running"));
}

#[tokio::test]
async fn test_hooks_start_by_priority_and_stop_in_reverse() {
    let manager = LifecycleManager::default();
    let clock = Arc::new(AtomicUsize::new(0));
    let low = Arc::new(TestHook::new("low", 5, clock.clone()));
    let high = Arc::new(TestHook::new("high", 10, clock.clone()));

    manager.register_hook(low.clone()).await;
    manager.register_hook(high.clone()).await;
    assert_eq!(manager.hook_names().await, vec!["high", "low"]);

    manager.start().await.unwrap();
    assert_eq!(high.started_at.load(Ordering::SeqCst), 1);
    assert_eq!(low.started_at.load(Ordering::SeqCst), 2);

    manager.stop().await.unwrap();
    assert_eq!(low.stopped_at.load(Ordering::SeqCst), 3);
    assert_eq!(high.stopped_at.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_failed_start_rolls_back_started_hooks() {
    let manager = LifecycleManager::default();
    let clock = Arc::new(AtomicUsize::new(0));
    let early = Arc::new(TestHook::new("early", 10, clock.clone()));
    let late = Arc::new(TestHook::new("late", -10, clock));

    manager.register_hook(early.clone()).await;
    manager.register_hook(Arc::new(FailingHook)).await;
    manager.register_hook(late.clone()).await;

    assert!(manager.start().await.is_err());
    assert_eq!(manager.state(), KernelState::Stopped);
    assert!(early.stopped.load(Ordering::SeqCst));
    assert_eq!(late.started_at.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_with_timeout_still_stops_others() {
    let manager = LifecycleManager::new(Duration::from_millis(10));
    let clock = Arc::new(AtomicUsize::new(0));
    let other = Arc::new(TestHook::new("other", 10, clock));
    manager.register_hook(Arc::new(SlowStopHook)).await;
    manager.register_hook(other.clone()).await;

    manager.start().await.unwrap();
    let err = manager.stop().await.unwrap_err();
    assert!(err.to_string().contains("slow"));
    assert!(other.stopped.load(Ordering::SeqCst));
    assert_eq!(manager.state(), KernelState::Stopped);
}

#[tokio::test]
async fn test_scheduler_hook() {
    let scheduler = Arc::new(JobScheduler::new(SchedulerConfig::default()));
    let hook = SchedulerLifecycleHook::new(scheduler.clone());
    assert_eq!(hook.priority(), priority::SCHEDULER);

    hook.on_start().await.unwrap();
    assert!(scheduler.is_started());
    assert!(hook.on_start().await.is_err());

    hook.on_stop().await.unwrap();
    assert!(!scheduler.is_started());
}
