use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use modhost_protocols::{
    CapabilityMetadata, EventHandler, HandlerRef, command_fn, event_fn, validator_fn,
};
use uuid::Uuid;

struct Fixture {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            registry: Arc::new(CapabilityRegistry::new()),
            bus: Arc::new(EventBus::new()),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone(), self.bus.clone())
    }

    fn register(&self, name: &str, module: &str, priority: i32, handler: HandlerRef) {
        self.register_with(name, module, priority, handler, CapabilityMetadata::new());
    }

    fn register_with(
        &self,
        name: &str,
        module: &str,
        priority: i32,
        handler: HandlerRef,
        metadata: CapabilityMetadata,
    ) {
        let key = match handler {
            HandlerRef::Validator(_) => CapabilityKey::validator(name),
            _ => CapabilityKey::command(name),
        };
        self.registry
            .register(
                HandlerRegistration::new(key, format!("{}::{}", module, name), handler, module)
                    .with_priority(priority)
                    .with_metadata(metadata),
            )
            .unwrap();
    }

    fn count_events(&self, topic: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        self.bus.subscribe(topic, "test", counting_subscriber(counter.clone()));
        counter
    }
}

fn counting_subscriber(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
    event_fn(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Handler answering with `reply`, counting invocations.
fn replying(reply: &'static str, calls: Arc<AtomicUsize>) -> HandlerRef {
    HandlerRef::Command(command_fn(move |_, _| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResultEnvelope::success(reply))
        }
    }))
}

fn failing(message: &'static str) -> HandlerRef {
    HandlerRef::Command(command_fn(move |_, _| async move {
        Err(HandlerError::Custom(message.to_string()))
    }))
}

fn panicking() -> HandlerRef {
    HandlerRef::Command(command_fn(|cmd: CommandEnvelope, _| async move {
        if !cmd.name.is_empty() {
            panic!("handler exploded");
        }
        Ok(ResultEnvelope::success("unreachable"))
    }))
}

fn messages(result: &ResultEnvelope) -> Vec<String> {
    result.history.iter().map(|h| h.message.clone()).collect()
}

async fn settle(counter: &AtomicUsize, expected: usize) {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_not_found_is_a_result() {
    let fx = Fixture::new();
    let result = fx.dispatcher().dispatch(CommandEnvelope::new("Ghost")).await;

    assert!(!result.success);
    assert_eq!(result.message, "Ghost not found");
    assert_eq!(messages(&result), vec!["routing", "returning"]);
    assert!(!result.trace_id.is_nil());
}

#[tokio::test]
async fn test_trace_id_adopted_or_minted() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register("Ping", "m", 0, replying("pong", calls));
    let dispatcher = fx.dispatcher();

    let id = Uuid::new_v4();
    let result = dispatcher
        .dispatch(CommandEnvelope::new("Ping").with_trace_id(id))
        .await;
    assert_eq!(result.trace_id, id);

    let a = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    let b = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert_ne!(a.trace_id, b.trace_id);
}

#[tokio::test]
async fn test_handler_sees_active_trace_id() {
    let fx = Fixture::new();
    fx.register(
        "Echo",
        "m",
        0,
        HandlerRef::Command(command_fn(|cmd: CommandEnvelope, trace: TraceContext| async move {
            assert_eq!(cmd.trace_id, Some(trace.trace_id));
            Ok(ResultEnvelope::success(trace.trace_id.to_string()))
        })),
    );

    let result = fx.dispatcher().dispatch(CommandEnvelope::new("Echo")).await;
    assert!(result.success);
    assert_eq!(result.message, result.trace_id.to_string());
}

#[tokio::test]
async fn test_priority_then_unregister_falls_to_next() {
    let fx = Fixture::new();
    let (a_calls, b_calls) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    fx.register("Ping", "module-a", 10, replying("from A", a_calls.clone()));
    fx.register("Ping", "module-b", 5, replying("from B", b_calls.clone()));
    let dispatcher = fx.dispatcher();

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert_eq!(result.message, "from A");

    fx.registry.unregister_by_source("module-a");
    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert_eq!(result.message, "from B");

    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_success_history() {
    let fx = Fixture::new();
    fx.register(
        "Orders.Create",
        "orders",
        0,
        HandlerRef::Command(command_fn(|_, _| async {
            Ok(ResultEnvelope::success("created")
                .with_data(serde_json::json!({"id": 7}))
                .with_hop("Orders", "persisted"))
        })),
    );

    let mut command = CommandEnvelope::new("Orders.Create");
    command.history.push(modhost_protocols::TraceHop::new("Client", "submitted"));

    let result = fx.dispatcher().dispatch(command).await;
    assert!(result.success);
    assert_eq!(result.data, Some(serde_json::json!({"id": 7})));
    assert_eq!(
        messages(&result),
        vec!["submitted", "routing", "persisted", "returning"]
    );
    assert!(result.history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_obsolete_is_blocked_and_never_invoked() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register_with(
        "Legacy.Export",
        "legacy",
        0,
        replying("exported", calls.clone()),
        CapabilityMetadata::new().obsolete("use Export.V2"),
    );
    let dispatcher = fx.dispatcher();

    for _ in 0..3 {
        let result = dispatcher.dispatch(CommandEnvelope::new("Legacy.Export")).await;
        assert!(!result.success);
        assert!(result.message.contains("use Export.V2"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deprecated_runs_and_warns_once_per_dispatch() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let warnings = fx.count_events(topics::SYSTEM_WARNING);
    fx.register_with(
        "Old.Thing",
        "old",
        0,
        replying("still works", calls.clone()),
        CapabilityMetadata::new().deprecated("moving to New.Thing"),
    );
    let dispatcher = fx.dispatcher();

    for _ in 0..3 {
        let result = dispatcher.dispatch(CommandEnvelope::new("Old.Thing")).await;
        assert!(result.success);
    }

    settle(&warnings, 3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(warnings.load(Ordering::SeqCst), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_handler_error_becomes_failure() {
    let fx = Fixture::new();
    fx.register("Fragile", "m", 0, failing("database unavailable"));

    let result = fx.dispatcher().dispatch(CommandEnvelope::new("Fragile")).await;
    assert!(!result.success);
    assert!(result.message.contains("database unavailable"));
    assert!(result.message.contains("Fragile"));
    let hops = messages(&result);
    assert_eq!(hops[0], "routing");
    assert!(hops[1].starts_with("crash: "));
}

#[tokio::test]
async fn test_handler_panic_is_trapped() {
    let fx = Fixture::new();
    fx.register("Boom", "m", 0, panicking());

    let result = fx.dispatcher().dispatch(CommandEnvelope::new("Boom")).await;
    assert!(!result.success);
    assert!(result.message.contains("handler exploded"));
    assert!(messages(&result).last().unwrap().starts_with("crash: "));
}

#[tokio::test]
async fn test_strict_mode_does_not_fall_back() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register("Ping", "a", 10, failing("a failed"));
    fx.register("Ping", "b", 5, replying("b", calls.clone()));

    let result = fx.dispatcher().dispatch(CommandEnvelope::new("Ping")).await;
    assert!(!result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fallback_walks_priority_list() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register("Ping", "a", 10, panicking());
    fx.register("Ping", "b", 7, failing("b failed"));
    fx.register("Ping", "c", 5, replying("from c", calls.clone()));
    let dispatcher = fx.dispatcher().with_mode(DispatchMode::Fallback);

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert!(result.success);
    assert_eq!(result.message, "from c");
    let crashes = messages(&result).iter().filter(|m| m.starts_with("crash: ")).count();
    assert_eq!(crashes, 2);
    assert_eq!(messages(&result).last().map(String::as_str), Some("returning"));
}

#[tokio::test]
async fn test_fallback_exhausted() {
    let fx = Fixture::new();
    fx.register("Ping", "a", 10, failing("a failed"));
    fx.register("Ping", "b", 5, panicking());
    let dispatcher = fx.dispatcher().with_mode(DispatchMode::Fallback);

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert!(!result.success);
    assert_eq!(result.message, "no handler succeeded for Ping");
    assert!(!result.message.contains("a failed"));
}

#[tokio::test]
async fn test_fallback_unsuccessful_result_is_not_a_fault() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register(
        "Ping",
        "a",
        10,
        HandlerRef::Command(command_fn(|_, _| async {
            Ok(ResultEnvelope::failure("insufficient funds"))
        })),
    );
    fx.register("Ping", "b", 5, replying("b", calls.clone()));
    let dispatcher = fx.dispatcher().with_mode(DispatchMode::Fallback);

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert!(!result.success);
    assert_eq!(result.message, "insufficient funds");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fallback_blocks_obsolete_head() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register_with(
        "Ping",
        "a",
        10,
        replying("a", calls.clone()),
        CapabilityMetadata::new().obsolete("retired in v2"),
    );
    fx.register("Ping", "b", 5, replying("b", calls.clone()));
    let dispatcher = fx.dispatcher().with_mode(DispatchMode::Fallback);

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert!(!result.success);
    assert!(result.message.contains("retired in v2"));
    assert_eq!(messages(&result), vec!["routing", "returning"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fallback_never_invokes_lower_obsolete() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register("Ping", "a", 10, failing("a is down"));
    fx.register_with(
        "Ping",
        "b",
        5,
        replying("b", calls.clone()),
        CapabilityMetadata::new().obsolete("gone"),
    );
    let dispatcher = fx.dispatcher().with_mode(DispatchMode::Fallback);

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert!(!result.success);
    assert_eq!(result.message, "no handler succeeded for Ping");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fallback_warns_once_for_deprecated_chain() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let warnings = fx.count_events(topics::SYSTEM_WARNING);
    fx.register_with(
        "Ping",
        "a",
        10,
        failing("a is down"),
        CapabilityMetadata::new().deprecated("use Ping2"),
    );
    fx.register_with(
        "Ping",
        "b",
        5,
        replying("b", calls.clone()),
        CapabilityMetadata::new().deprecated("use Ping2"),
    );
    let dispatcher = fx.dispatcher().with_mode(DispatchMode::Fallback);

    let result = dispatcher.dispatch(CommandEnvelope::new("Ping")).await;
    assert_eq!(result.message, "b");

    settle(&warnings, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deprecated_warns_before_validation() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let warnings = fx.count_events(topics::SYSTEM_WARNING);
    fx.register_with(
        "Old.Thing",
        "old",
        0,
        replying("still works", calls.clone()),
        CapabilityMetadata::new().deprecated("moving to New.Thing"),
    );
    fx.register(
        "Old.Thing",
        "old",
        0,
        HandlerRef::Validator(validator_fn(|_cmd: CommandEnvelope, _| async move {
            Err(HandlerError::Validation("always rejected".into()))
        })),
    );

    let result = fx
        .dispatcher()
        .dispatch(CommandEnvelope::new("Old.Thing"))
        .await;
    assert!(!result.success);
    assert!(result.message.contains("always rejected"));

    settle(&warnings, 1).await;
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_short_circuits() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fx.register("Orders.Create", "orders", 0, replying("created", calls.clone()));
    fx.register(
        "Orders.Create",
        "orders",
        0,
        HandlerRef::Validator(validator_fn(|cmd: CommandEnvelope, _| async move {
            match cmd.param_as::<u32>("qty") {
                Some(q) if q > 0 => Ok(()),
                _ => Err(HandlerError::Validation("qty must be positive".into())),
            }
        })),
    );

    let dispatcher = fx.dispatcher();
    let rejected = dispatcher
        .dispatch(CommandEnvelope::new("Orders.Create").with_param("qty", 0))
        .await;
    assert!(!rejected.success);
    assert!(rejected.message.contains("qty must be positive"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let accepted = dispatcher
        .dispatch(CommandEnvelope::new("Orders.Create").with_param("qty", 2))
        .await;
    assert!(accepted.success);

    let unchecked = fx.dispatcher().with_validation(false);
    assert!(unchecked.dispatch(CommandEnvelope::new("Orders.Create")).await.success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_journal_records_every_dispatch() {
    let fx = Fixture::new();
    let entries = fx.count_events(topics::LOG_INTERNAL);
    let journal = Arc::new(ExecutionJournal::new(fx.bus.clone()));
    let dispatcher = fx.dispatcher().with_journal(journal);

    dispatcher.dispatch(CommandEnvelope::new("Ghost")).await;
    dispatcher.dispatch(CommandEnvelope::new("Ghost")).await;
    assert_eq!(entries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_inflight_tracked_during_handler() {
    let fx = Fixture::new();
    let inflight = Arc::new(InflightTracker::new());
    let observed = Arc::new(AtomicUsize::new(usize::MAX));
    {
        let inflight = inflight.clone();
        let observed = observed.clone();
        fx.register(
            "Probe",
            "probe-module",
            0,
            HandlerRef::Command(command_fn(move |_, _| {
                let inflight = inflight.clone();
                let observed = observed.clone();
                async move {
                    observed.store(inflight.count("probe-module"), Ordering::SeqCst);
                    Ok(ResultEnvelope::success("ok"))
                }
            })),
        );
    }

    let dispatcher = fx.dispatcher().with_inflight(inflight.clone());
    dispatcher.dispatch(CommandEnvelope::new("Probe")).await;
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(inflight.count("probe-module"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_keeps_traces_apart() {
    let fx = Fixture::new();
    fx.register(
        "Echo",
        "m",
        0,
        HandlerRef::Command(command_fn(|_, trace: TraceContext| async move {
            tokio::task::yield_now().await;
            Ok(ResultEnvelope::success(trace.trace_id.to_string()))
        })),
    );
    let dispatcher = Arc::new(fx.dispatcher());

    let mut handles = Vec::new();
    for _ in 0..64 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let id = Uuid::new_v4();
            let result = dispatcher
                .dispatch(CommandEnvelope::new("Echo").with_trace_id(id))
                .await;
            (id, result)
        }));
    }

    for handle in handles {
        let (id, result) = handle.await.unwrap();
        assert_eq!(result.trace_id, id);
        assert_eq!(result.message, id.to_string());
        assert_eq!(result.history.len(), 2);
    }
}

#[tokio::test]
async fn test_command_sender_impl() {
    let fx = Fixture::new();
    let sender: Arc<dyn CommandSender> = Arc::new(fx.dispatcher());
    let result = sender.send(CommandEnvelope::new("Ghost")).await;
    assert!(!result.success);
}

#[test]
fn test_dispatch_mode_parse() {
    assert_eq!("strict".parse::<DispatchMode>().unwrap(), DispatchMode::Strict);
    assert_eq!(" Fallback ".parse::<DispatchMode>().unwrap(), DispatchMode::Fallback);
    assert!("random".parse::<DispatchMode>().is_err());
    assert_eq!(DispatchMode::default(), DispatchMode::Strict);
}
