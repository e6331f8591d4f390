//! Diagnostics module definition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use modhost_protocols::event::topics;
use modhost_protocols::{
    Capability, Durability, EventEnvelope, HandlerError, Module, ModuleContext, ModuleError,
    ModuleManifest, ResultEnvelope, ScheduleSpec, ServiceCollection, command_fn, event_fn, job_fn,
};

use crate::stats::DiagnosticsStats;

/// Builtin catalog entry.
pub const ENTRY: &str = "diagnostics";

pub const PING: &str = "Diagnostics.Ping";
pub const WARNINGS: &str = "Diagnostics.Warnings";
pub const HEARTBEAT_JOB: &str = "Diagnostics.Heartbeat";
pub const HEARTBEAT_TOPIC: &str = "diagnostics.heartbeat";
/// Transient store key holding the last heartbeat time (RFC 3339).
pub const LAST_HEARTBEAT_KEY: &str = "Diagnostics.LastHeartbeat";

const DEFAULT_HEARTBEAT_SECONDS: u64 = 60;

pub struct DiagnosticsModule {
    manifest: ModuleManifest,
    stats: Arc<DiagnosticsStats>,
    ctx: Option<ModuleContext>,
}

impl DiagnosticsModule {
    pub fn new(manifest: &ModuleManifest) -> Self {
        Self {
            manifest: manifest.clone(),
            stats: Arc::new(DiagnosticsStats::new()),
            ctx: None,
        }
    }

    fn context(&self) -> Result<&ModuleContext, ModuleError> {
        self.ctx
            .as_ref()
            .ok_or_else(|| ModuleError::DescribeFailed("diagnostics not initialized".into()))
    }

    fn heartbeat_interval(ctx: &ModuleContext) -> Duration {
        let seconds = ctx
            .get_config::<u64>("heartbeat_seconds")
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_SECONDS);
        Duration::from_secs(seconds)
    }
}

#[async_trait]
impl Module for DiagnosticsModule {
    fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    fn configure_services(&self, services: &mut ServiceCollection) -> Result<(), ModuleError> {
        services.add(self.stats.clone());
        Ok(())
    }

    async fn initialize(&mut self, ctx: ModuleContext) -> Result<(), ModuleError> {
        // Adopt the instance published during configuration.
        if let Some(stats) = ctx.services.get::<DiagnosticsStats>() {
            self.stats = stats;
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn capabilities(&self) -> Result<Vec<Capability>, ModuleError> {
        let ctx = self.context()?;
        let module_id = ctx.module_id.clone();

        let ping = {
            let stats = self.stats.clone();
            command_fn(move |_cmd, _trace| {
                let stats = stats.clone();
                let module_id = module_id.clone();
                async move {
                    let pings = stats.record_ping();
                    Ok(ResultEnvelope::success("pong").with_data(json!({
                        "module": module_id,
                        "started_at": stats.started_at(),
                        "uptime_seconds": stats.uptime_seconds(),
                        "pings": pings,
                        "heartbeats": stats.heartbeats(),
                        "warnings": stats.recent_warnings().len(),
                    })))
                }
            })
        };

        let warnings = {
            let stats = self.stats.clone();
            command_fn(move |cmd, _trace| {
                let stats = stats.clone();
                async move {
                    let mut recent = stats.recent_warnings();
                    if let Some(limit) = cmd.param_as::<usize>("limit") {
                        recent.truncate(limit);
                    }
                    let data = serde_json::to_value(&recent).map_err(HandlerError::execution)?;
                    Ok(ResultEnvelope::success(format!("{} warnings", recent.len()))
                        .with_data(data))
                }
            })
        };

        let heartbeat = {
            let stats = self.stats.clone();
            let events = ctx.events.clone();
            let store = ctx.store.clone();
            let source = ctx.module_id.clone();
            job_fn(move |job| {
                let stats = stats.clone();
                let events = events.clone();
                let store = store.clone();
                let source = source.clone();
                async move {
                    let count = stats.record_heartbeat();
                    debug!(count, "Heartbeat");

                    if let Some(store) = &store {
                        store
                            .store(
                                LAST_HEARTBEAT_KEY,
                                json!(Utc::now().to_rfc3339()),
                                Durability::Transient,
                                &source,
                            )
                            .await
                            .map_err(HandlerError::execution)?;
                    }

                    events
                        .publish(
                            EventEnvelope::new(HEARTBEAT_TOPIC, source)
                                .with_data("count", count)
                                .with_data("uptime_seconds", stats.uptime_seconds())
                                .with_trace_id(job.trace.trace_id),
                        )
                        .await;
                    Ok(())
                }
            })
        };

        let on_warning = {
            let stats = self.stats.clone();
            event_fn(move |event| {
                let stats = stats.clone();
                async move {
                    let message = event
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("(no message)")
                        .to_string();
                    let source = event
                        .get("source")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&event.source_id)
                        .to_string();
                    warn!(%source, %message, "System warning");
                    stats.record_warning(source, message);
                    Ok(())
                }
            })
        };

        Ok(vec![
            Capability::command(PING, ping).with_description("Liveness probe with uptime and counters"),
            Capability::command(WARNINGS, warnings)
                .with_description("Recent system warnings, newest first; optional 'limit'"),
            Capability::job(
                HEARTBEAT_JOB,
                ScheduleSpec::every(Self::heartbeat_interval(ctx)),
                heartbeat,
            )
            .with_description("Publish a heartbeat event"),
            Capability::event(topics::SYSTEM_WARNING, on_warning)
                .with_description("Record system warnings"),
        ])
    }
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
