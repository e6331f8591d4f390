//! Module-side runtime for process modules.
//!
//! A module binary builds a [`ModuleServer`] from ordinary [`Capability`]
//! values and calls [`ModuleServer::run_stdio`]. Each request is handled on
//! its own task, so a slow handler does not hold up the others; responses and
//! notifications share one writer so frames never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use modhost_protocols::{
    Capability, EventEnvelope, HandlerError, HandlerRef, JobContext, TraceContext,
};

use crate::protocol::{
    CommandParams, EventParams, InitializeParams, JobParams, LogParams, Notification,
    RemoteCapability, Request, Response, methods,
};

type InitHook = Arc<dyn Fn(InitializeParams) -> Result<(), HandlerError> + Send + Sync>;

/// Sends unsolicited frames (events, log lines) to the host.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<String>,
}

impl Notifier {
    /// Publish `event` on the host's event bus. Returns `false` once the
    /// server has stopped.
    pub fn publish(&self, event: EventEnvelope) -> bool {
        match serde_json::to_value(event) {
            Ok(params) => self.send(methods::PUBLISH, params),
            Err(_) => false,
        }
    }

    /// Forward a log line to the host's tracing output.
    pub fn log(&self, level: &str, message: impl Into<String>) -> bool {
        let params = LogParams {
            level: level.to_string(),
            message: message.into(),
        };
        match serde_json::to_value(params) {
            Ok(params) => self.send(methods::LOG, params),
            Err(_) => false,
        }
    }

    fn send(&self, method: &str, params: Value) -> bool {
        let frame = Notification {
            method: method.to_string(),
            params,
        };
        match serde_json::to_string(&frame) {
            Ok(line) => self.tx.send(line).is_ok(),
            Err(_) => false,
        }
    }
}

pub struct ModuleServer {
    capabilities: Vec<Capability>,
    on_initialize: Option<InitHook>,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ModuleServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            capabilities: Vec::new(),
            on_initialize: None,
            tx,
            rx,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Run `hook` when the host sends `initialize`. An error fails the load.
    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(InitializeParams) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_initialize = Some(Arc::new(hook));
        self
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            tx: self.tx.clone(),
        }
    }

    /// Serve on this process's stdin/stdout until `shutdown` or EOF.
    pub async fn run_stdio(self) -> std::io::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve the protocol over any line-oriented stream pair.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            capabilities,
            on_initialize,
            tx,
            rx,
        } = self;

        let stop = CancellationToken::new();
        let writer_task = tokio::spawn(write_frames(writer, rx, stop.clone()));

        let state = Arc::new(ServerState {
            described: capabilities.iter().map(describe).collect(),
            handlers: capabilities
                .into_iter()
                .map(|c| (c.handler_id, c.handler))
                .collect(),
            on_initialize,
        });

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Unparseable request");
                    continue;
                }
            };
            debug!(id = request.id, method = %request.method, "Request received");

            if request.method == methods::SHUTDOWN {
                send(&tx, &Response::ok(request.id, Value::Null));
                break;
            }

            let state = state.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let id = request.id;
                // Handler panics surface as a JoinError on the inner task.
                let response = match tokio::spawn(state.handle(request)).await {
                    Ok(response) => response,
                    Err(e) => Response::err(id, HandlerError::Panicked(e.to_string()).to_string()),
                };
                send(&tx, &response);
            });
        }

        stop.cancel();
        writer_task.await.map_err(std::io::Error::other)?
    }
}

impl Default for ModuleServer {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerState {
    described: Vec<RemoteCapability>,
    handlers: HashMap<String, HandlerRef>,
    on_initialize: Option<InitHook>,
}

impl ServerState {
    async fn handle(self: Arc<Self>, request: Request) -> Response {
        let id = request.id;
        match self.route(request).await {
            Ok(value) => Response::ok(id, value),
            Err(e) => Response::err(id, e.to_string()),
        }
    }

    async fn route(&self, request: Request) -> Result<Value, HandlerError> {
        match request.method.as_str() {
            methods::DESCRIBE => to_value(&self.described),
            methods::INITIALIZE => {
                let params: InitializeParams = parse(request.params)?;
                if let Some(hook) = &self.on_initialize {
                    (hook.as_ref())(params)?;
                }
                Ok(Value::Null)
            }
            methods::COMMAND => {
                let params: CommandParams = parse(request.params)?;
                let handler = self
                    .handler(&params.handler_id)?
                    .as_command()
                    .ok_or_else(|| wrong_kind(&params.handler_id))?;
                let result = handler.handle(&params.command, &params.trace).await?;
                to_value(&result)
            }
            methods::VALIDATE => {
                let params: CommandParams = parse(request.params)?;
                let validator = self
                    .handler(&params.handler_id)?
                    .as_validator()
                    .ok_or_else(|| wrong_kind(&params.handler_id))?;
                validator.validate(&params.command, &params.trace).await?;
                Ok(Value::Null)
            }
            methods::EVENT => {
                let params: EventParams = parse(request.params)?;
                let handler = self
                    .handler(&params.handler_id)?
                    .as_event()
                    .ok_or_else(|| wrong_kind(&params.handler_id))?;
                handler.handle(&params.event).await?;
                Ok(Value::Null)
            }
            methods::JOB => {
                let params: JobParams = parse(request.params)?;
                let job = self
                    .handler(&params.handler_id)?
                    .as_job()
                    .ok_or_else(|| wrong_kind(&params.handler_id))?;
                let mut ctx = JobContext::new(params.job_name, CancellationToken::new())
                    .with_last_run(params.last_run);
                ctx.trace = TraceContext::with_id(params.trace_id);
                job.execute(&ctx).await?;
                Ok(Value::Null)
            }
            other => Err(HandlerError::Custom(format!("unknown method: {}", other))),
        }
    }

    fn handler(&self, handler_id: &str) -> Result<&HandlerRef, HandlerError> {
        self.handlers
            .get(handler_id)
            .ok_or_else(|| HandlerError::Custom(format!("unknown handler: {}", handler_id)))
    }
}

fn describe(capability: &Capability) -> RemoteCapability {
    RemoteCapability {
        kind: capability.key.kind,
        name: capability.key.name.clone(),
        handler_id: capability.handler_id.clone(),
        priority: capability.priority,
        metadata: capability.metadata.clone(),
        schedule: capability.schedule.clone(),
    }
}

fn wrong_kind(handler_id: &str) -> HandlerError {
    HandlerError::Custom(format!("handler {} has a different kind", handler_id))
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, HandlerError> {
    serde_json::from_value(params).map_err(|e| HandlerError::InvalidParameters(e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(HandlerError::execution)
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => warn!(id = response.id, error = %e, "Failed to encode response"),
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            line = rx.recv() => match line {
                Some(line) => write_line(&mut writer, &line).await?,
                None => break,
            },
            _ = stop.cancelled() => {
                while let Ok(line) = rx.try_recv() {
                    write_line(&mut writer, &line).await?;
                }
                break;
            }
        }
    }
    writer.flush().await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
