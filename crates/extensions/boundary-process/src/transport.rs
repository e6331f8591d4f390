//! Host side of the stdio channel to a module process.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

use modhost_protocols::{BoundaryError, EventEnvelope, EventPublisher};

use crate::protocol::{Incoming, LogParams, Notification, Request, Response, methods};

/// How long a module gets to exit on its own after stdin closes.
const EXIT_GRACE: Duration = Duration::from_millis(500);

type PendingRequests = HashMap<u64, oneshot::Sender<Result<Value, BoundaryError>>>;

/// A running module process plus request/response correlation.
///
/// Requests carry a monotonically increasing id. A background task reads
/// stdout and completes the matching pending request; notifications are
/// routed to the attached [`EventPublisher`] or to tracing.
pub struct ProcessTransport {
    label: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    next_id: AtomicU64,
    pending: Arc<SyncMutex<PendingRequests>>,
    publisher: Arc<RwLock<Option<Arc<dyn EventPublisher>>>>,
    closed: Arc<AtomicBool>,
    response_timeout: Duration,
}

impl ProcessTransport {
    /// Spawn `program` and start the reader tasks.
    pub fn spawn(
        label: impl Into<String>,
        program: &Path,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
        response_timeout: Duration,
    ) -> Result<Arc<Self>, BoundaryError> {
        let label = label.into();

        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BoundaryError::Spawn(format!("{}: {}", program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BoundaryError::Spawn("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BoundaryError::Spawn("Failed to capture stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(module = %label, "[stderr] {}", line);
                }
            });
        }

        info!(module = %label, program = %program.display(), pid = ?child.id(), "Module process started");

        let transport = Arc::new(Self {
            label,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(SyncMutex::new(HashMap::new())),
            publisher: Arc::new(RwLock::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            response_timeout,
        });
        transport.start_reader(stdout);
        Ok(transport)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Where `publish` notifications from the module go.
    pub fn set_publisher(&self, publisher: Arc<dyn EventPublisher>) {
        *self.publisher.write() = Some(publisher);
    }

    /// Send a request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BoundaryError> {
        if self.is_closed() {
            return Err(BoundaryError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        let line = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }
        debug!(module = %self.label, id, method, "Request sent");

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BoundaryError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!(module = %self.label, id, method, "Module did not answer in time");
                Err(BoundaryError::Timeout(self.response_timeout.as_millis() as u64))
            }
        }
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    pub async fn close(&self) -> Result<(), BoundaryError> {
        self.closed.store(true, Ordering::SeqCst);
        *self.stdin.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(module = %self.label, %status, "Module process exited"),
                _ => {
                    child.kill().await?;
                    debug!(module = %self.label, "Module process killed");
                }
            }
        }

        fail_pending(&self.pending);
        Ok(())
    }

    async fn write_line(&self, line: &str) -> Result<(), BoundaryError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(BoundaryError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    fn start_reader(&self, stdout: ChildStdout) {
        let label = self.label.clone();
        let pending = self.pending.clone();
        let publisher = self.publisher.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Incoming>(&line) {
                    Ok(Incoming::Response(response)) => complete(&pending, response),
                    Ok(Incoming::Notification(notification)) => {
                        route_notification(&label, &publisher, notification)
                    }
                    Err(e) => {
                        error!(module = %label, error = %e, "Unparseable frame: {}", truncate(&line));
                    }
                }
            }

            closed.store(true, Ordering::SeqCst);
            fail_pending(&pending);
            info!(module = %label, "Module process output closed");
        });
    }
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn complete(pending: &SyncMutex<PendingRequests>, response: Response) {
    let Some(sender) = pending.lock().remove(&response.id) else {
        debug!(id = response.id, "Response for unknown or expired request");
        return;
    };
    let result = match response.error {
        Some(err) => Err(BoundaryError::Remote(err.message)),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = sender.send(result);
}

fn fail_pending(pending: &SyncMutex<PendingRequests>) {
    for (_, sender) in pending.lock().drain() {
        let _ = sender.send(Err(BoundaryError::Closed));
    }
}

fn route_notification(
    label: &str,
    publisher: &RwLock<Option<Arc<dyn EventPublisher>>>,
    notification: Notification,
) {
    match notification.method.as_str() {
        methods::PUBLISH => {
            let event = match serde_json::from_value::<EventEnvelope>(notification.params) {
                Ok(event) => event,
                Err(e) => {
                    warn!(module = %label, error = %e, "Malformed publish notification");
                    return;
                }
            };
            let Some(publisher) = publisher.read().clone() else {
                warn!(module = %label, topic = %event.topic, "Publish before initialize, dropped");
                return;
            };
            // Off the reader task: a subscriber may call back into this module.
            tokio::spawn(async move { publisher.publish(event).await });
        }
        methods::LOG => match serde_json::from_value::<LogParams>(notification.params) {
            Ok(log) => match log.level.as_str() {
                "error" => error!(module = %label, "{}", log.message),
                "warn" => warn!(module = %label, "{}", log.message),
                "debug" | "trace" => debug!(module = %label, "{}", log.message),
                _ => info!(module = %label, "{}", log.message),
            },
            Err(e) => warn!(module = %label, error = %e, "Malformed log notification"),
        },
        other => warn!(module = %label, method = other, "Unknown notification"),
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(200) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
