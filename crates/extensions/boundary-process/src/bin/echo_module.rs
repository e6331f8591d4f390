//! Sample process module used by the integration tests and as a template.
//!
//! Manifest:
//!
//! ```toml
//! id = "echo"
//! [boundary]
//! kind = "process"
//! command = "modhost-echo-module"
//! [config]
//! prefix = "echo"
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing_subscriber::EnvFilter;

use modhost_boundary_process::ModuleServer;
use modhost_protocols::{
    Capability, EventEnvelope, HandlerError, ResultEnvelope, ScheduleSpec, command_fn, event_fn,
    job_fn, validator_fn,
};

const SOURCE: &str = "echo";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // stdout carries protocol frames; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let prefix = Arc::new(RwLock::new(SOURCE.to_string()));
    let server = ModuleServer::new();
    let notifier = server.notifier();

    let server = {
        let prefix = prefix.clone();
        server.on_initialize(move |params| {
            if let Some(p) = params.config.get("prefix").and_then(|v| v.as_str()) {
                *prefix.write() = p.to_string();
            }
            Ok(())
        })
    };

    let say = {
        let prefix = prefix.clone();
        command_fn(move |cmd, trace| {
            let prefix = prefix.read().clone();
            async move {
                let text = cmd.param_as::<String>("text").unwrap_or_default();
                Ok(ResultEnvelope::success(format!("{}: {}", prefix, text))
                    .with_data(serde_json::json!({ "text": text, "pid": std::process::id() }))
                    .with_hop(SOURCE, format!("echoed on {}", trace.trace_id)))
            }
        })
    };

    let pong = {
        let notifier = notifier.clone();
        event_fn(move |event| {
            let notifier = notifier.clone();
            async move {
                let mut pong = EventEnvelope::new("echo.pong", SOURCE);
                pong.data = event.data.clone();
                pong.trace_id = event.trace_id;
                notifier.publish(pong);
                Ok(())
            }
        })
    };

    let tick = {
        let notifier = notifier.clone();
        job_fn(move |ctx| {
            let notifier = notifier.clone();
            async move {
                notifier.log("debug", format!("tick {}", ctx.trace.trace_id));
                notifier.publish(
                    EventEnvelope::new("echo.ticked", SOURCE).with_trace_id(ctx.trace.trace_id),
                );
                Ok(())
            }
        })
    };

    server
        .with_capability(Capability::command("Echo.Say", say).with_description("Echo the 'text' parameter"))
        .with_capability(
            Capability::validator(
                "Echo.Say",
                validator_fn(|cmd, _trace| async move {
                    match cmd.param("text") {
                        Some(v) if v.is_string() => Ok(()),
                        _ => Err(HandlerError::Validation("'text' (string) is required".into())),
                    }
                }),
            )
            .with_handler_id("Echo.Say.validate"),
        )
        .with_capability(
            Capability::command(
                "Echo.Fail",
                command_fn(|_cmd, _trace| async {
                    Err(HandlerError::ExecutionFailed("requested failure".into()))
                }),
            )
            .with_description("Always fails"),
        )
        .with_capability(
            Capability::command(
                "Echo.Slow",
                command_fn(|cmd, _trace| async move {
                    let ms = cmd.param_as::<u64>("ms").unwrap_or(1000);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ResultEnvelope::success(format!("slept {}ms", ms)))
                }),
            )
            .with_description("Sleep for 'ms' milliseconds"),
        )
        .with_capability(
            Capability::command(
                "Echo.Exit",
                command_fn(|_cmd, _trace| async { std::process::exit(3) }),
            )
            .with_description("Terminate the module process"),
        )
        .with_capability(Capability::event("echo.ping", pong))
        .with_capability(Capability::job(
            "echo.tick",
            ScheduleSpec::every(Duration::from_secs(60)),
            tick,
        ))
        .run_stdio()
        .await
}
