//! Process boundary factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use modhost_protocols::boundary::PROCESS;
use modhost_protocols::{BoundaryError, BoundaryFactory, Module, ModuleBoundary, ModuleManifest};

use crate::proxy::ProcessModule;
use crate::transport::ProcessTransport;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates [`ProcessBoundary`]s for manifests with `kind = "process"`.
#[derive(Debug, Clone)]
pub struct ProcessBoundaryFactory {
    response_timeout: Duration,
}

impl ProcessBoundaryFactory {
    pub fn new() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Per-request limit before a call fails with a timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

impl Default for ProcessBoundaryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryFactory for ProcessBoundaryFactory {
    fn kind(&self) -> &str {
        PROCESS
    }

    fn create(
        &self,
        manifest: &ModuleManifest,
        module_dir: &Path,
    ) -> Result<Arc<dyn ModuleBoundary>, BoundaryError> {
        let command = manifest
            .boundary
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                BoundaryError::EntryNotFound(format!(
                    "module '{}' declares no boundary command",
                    manifest.id
                ))
            })?;

        Ok(Arc::new(ProcessBoundary {
            manifest: manifest.clone(),
            dir: module_dir.to_path_buf(),
            program: resolve_program(command, module_dir),
            args: manifest.boundary.args.clone(),
            env: manifest.boundary.env.clone(),
            response_timeout: self.response_timeout,
            transport: Mutex::new(None),
            released: AtomicBool::new(false),
        }))
    }
}

/// Relative commands resolve against the module directory when the file is
/// there; otherwise the name is left for a `PATH` lookup.
fn resolve_program(command: &str, module_dir: &Path) -> PathBuf {
    let path = Path::new(command);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let local = module_dir.join(path);
    if local.exists() {
        local
    } else {
        path.to_path_buf()
    }
}

/// One child process per boundary, shared by every instance it hands out.
pub struct ProcessBoundary {
    manifest: ModuleManifest,
    dir: PathBuf,
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    response_timeout: Duration,
    transport: Mutex<Option<Arc<ProcessTransport>>>,
    released: AtomicBool,
}

impl ProcessBoundary {
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn transport(&self) -> Result<Arc<ProcessTransport>, BoundaryError> {
        let mut guard = self.transport.lock().await;
        if let Some(transport) = guard.as_ref().filter(|t| !t.is_closed()) {
            return Ok(transport.clone());
        }

        let transport = ProcessTransport::spawn(
            self.manifest.id.clone(),
            &self.program,
            &self.args,
            &self.env,
            &self.dir,
            self.response_timeout,
        )?;
        *guard = Some(transport.clone());
        Ok(transport)
    }
}

#[async_trait]
impl ModuleBoundary for ProcessBoundary {
    fn kind(&self) -> &str {
        PROCESS
    }

    async fn instantiate(&self) -> Result<Box<dyn Module>, BoundaryError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(BoundaryError::Released);
        }
        let transport = self.transport().await?;
        Ok(Box::new(ProcessModule::new(self.manifest.clone(), transport)))
    }

    async fn release(&self) -> Result<(), BoundaryError> {
        self.released.store(true, Ordering::SeqCst);
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            debug!(module = %self.manifest.id, "Releasing process boundary");
            transport.close().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBoundary")
            .field("module", &self.manifest.id)
            .field("program", &self.program)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_protocols::boundary::BoundarySpec;
    use modhost_protocols::Version;

    fn manifest(boundary: BoundarySpec) -> ModuleManifest {
        ModuleManifest::new("echo", "Echo", Version::new(1, 0, 0)).with_boundary(boundary)
    }

    #[test]
    fn test_factory_kind() {
        assert_eq!(ProcessBoundaryFactory::new().kind(), PROCESS);
    }

    #[test]
    fn test_missing_command_is_entry_not_found() {
        let factory = ProcessBoundaryFactory::new();
        let spec = BoundarySpec {
            kind: PROCESS.to_string(),
            ..BoundarySpec::default()
        };
        let result = factory.create(&manifest(spec), Path::new("/tmp"));
        assert!(matches!(result, Err(BoundaryError::EntryNotFound(msg)) if msg.contains("echo")));
    }

    #[test]
    fn test_resolve_program() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "").unwrap();

        assert_eq!(resolve_program("./run.sh", dir.path()), dir.path().join("./run.sh"));
        assert_eq!(resolve_program("python3", dir.path()), PathBuf::from("python3"));
        assert_eq!(resolve_program("/usr/bin/env", dir.path()), PathBuf::from("/usr/bin/env"));
    }

    #[tokio::test]
    async fn test_released_boundary_refuses_instances() {
        let factory = ProcessBoundaryFactory::new();
        let boundary = factory
            .create(&manifest(BoundarySpec::process("/nonexistent/bin")), Path::new("/tmp"))
            .unwrap();
        boundary.release().await.unwrap();
        assert!(matches!(boundary.instantiate().await, Err(BoundaryError::Released)));
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_on_instantiate() {
        let factory = ProcessBoundaryFactory::new();
        let boundary = factory
            .create(&manifest(BoundarySpec::process("/nonexistent/bin")), Path::new("/tmp"))
            .unwrap();
        assert!(matches!(boundary.instantiate().await, Err(BoundaryError::Spawn(_))));
    }
}
