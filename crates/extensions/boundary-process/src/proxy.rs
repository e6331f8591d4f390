//! Host-side proxy module and remote handler stubs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use modhost_protocols::{
    BoundaryError, Capability, CapabilityKey, CommandEnvelope, CommandHandler, CommandValidator,
    ContractKind, EventEnvelope, EventHandler, HandlerError, HandlerRef, JobContext, JobHandler,
    Module, ModuleContext, ModuleError, ModuleManifest, ResultEnvelope, TraceContext,
};

use crate::protocol::{
    CommandParams, EventParams, InitializeParams, JobParams, RemoteCapability, methods,
};
use crate::transport::ProcessTransport;

/// A [`Module`] whose lifecycle calls and handlers are forwarded to a child
/// process.
pub struct ProcessModule {
    manifest: ModuleManifest,
    transport: Arc<ProcessTransport>,
}

impl ProcessModule {
    pub fn new(manifest: ModuleManifest, transport: Arc<ProcessTransport>) -> Self {
        Self {
            manifest,
            transport,
        }
    }
}

#[async_trait]
impl Module for ProcessModule {
    fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    async fn initialize(&mut self, ctx: ModuleContext) -> Result<(), ModuleError> {
        self.transport.set_publisher(ctx.events.clone());

        let params = InitializeParams {
            module_id: ctx.module_id.clone(),
            config: ctx.config.clone(),
        };
        call::<_, Value>(&self.transport, methods::INITIALIZE, &params)
            .await
            .map_err(|e| ModuleError::InitializationFailed(e.to_string()))?;
        Ok(())
    }

    async fn capabilities(&self) -> Result<Vec<Capability>, ModuleError> {
        let described: Vec<RemoteCapability> =
            call(&self.transport, methods::DESCRIBE, &Value::Null)
                .await
                .map_err(|e| ModuleError::DescribeFailed(e.to_string()))?;

        Ok(described
            .into_iter()
            .map(|remote| self.proxy(remote))
            .collect())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        if self.transport.is_closed() {
            return Ok(());
        }
        call::<_, Value>(&self.transport, methods::SHUTDOWN, &Value::Null)
            .await
            .map_err(|e| ModuleError::ShutdownFailed(e.to_string()))?;
        Ok(())
    }
}

impl ProcessModule {
    fn proxy(&self, remote: RemoteCapability) -> Capability {
        let stub = RemoteHandler {
            transport: self.transport.clone(),
            handler_id: remote.handler_id.clone(),
        };
        let handler = match remote.kind {
            ContractKind::Command => HandlerRef::Command(Arc::new(stub)),
            ContractKind::Event => HandlerRef::Event(Arc::new(stub)),
            ContractKind::Job => HandlerRef::Job(Arc::new(stub)),
            ContractKind::Validator => HandlerRef::Validator(Arc::new(stub)),
        };

        Capability {
            key: CapabilityKey::new(remote.kind, remote.name),
            handler_id: remote.handler_id,
            handler,
            priority: remote.priority,
            metadata: remote.metadata,
            schedule: remote.schedule,
        }
    }
}

/// Forwards one handler's invocations to the module process.
struct RemoteHandler {
    transport: Arc<ProcessTransport>,
    handler_id: String,
}

#[async_trait]
impl CommandHandler for RemoteHandler {
    async fn handle(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        let params = CommandParams {
            handler_id: self.handler_id.clone(),
            command: command.clone(),
            trace: trace.clone(),
        };
        Ok(call(&self.transport, methods::COMMAND, &params).await?)
    }
}

#[async_trait]
impl CommandValidator for RemoteHandler {
    async fn validate(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<(), HandlerError> {
        let params = CommandParams {
            handler_id: self.handler_id.clone(),
            command: command.clone(),
            trace: trace.clone(),
        };
        call::<_, Value>(&self.transport, methods::VALIDATE, &params)
            .await
            .map_err(|e| match e {
                BoundaryError::Remote(message) => HandlerError::Custom(message),
                other => other.into(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RemoteHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        let params = EventParams {
            handler_id: self.handler_id.clone(),
            event: event.clone(),
        };
        call::<_, Value>(&self.transport, methods::EVENT, &params).await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RemoteHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<(), HandlerError> {
        let params = JobParams {
            handler_id: self.handler_id.clone(),
            job_name: ctx.job_name.clone(),
            trace_id: ctx.trace.trace_id,
            last_run: ctx.last_run,
        };
        tokio::select! {
            result = call::<_, Value>(&self.transport, methods::JOB, &params) => {
                result?;
                Ok(())
            }
            _ = ctx.cancellation.cancelled() => Err(HandlerError::Cancelled),
        }
    }
}

async fn call<P, R>(transport: &ProcessTransport, method: &str, params: &P) -> Result<R, BoundaryError>
where
    P: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let value = transport.call(method, serde_json::to_value(params)?).await?;
    Ok(serde_json::from_value(value)?)
}
