//! # modhost core
//!
//! The kernel of the modhost application host.
//!
//! ## Components
//!
//! - [`CapabilityRegistry`] - priority-ordered catalog of handlers per capability key
//! - [`EventBus`] - topic pub/sub with per-subscriber fault isolation
//! - [`Dispatcher`] - the single entry point for commands
//! - [`ModuleLoader`] - discovery, two-phase load, unload and hot reload of modules
//! - [`ExecutionJournal`] - one `system.log.internal` record per dispatch
//! - [`Kernel`] - wires all of the above to a [`LifecycleManager`]
//!
//! Hosted code never unwinds through [`Dispatcher::dispatch`],
//! [`EventBus::publish`] or a scheduler tick.

pub mod builtins;
pub mod bus;
pub mod dispatcher;
pub mod fault;
pub mod inflight;
pub mod journal;
pub mod kernel;
pub mod lifecycle;
pub mod loader;
pub mod registry;
pub mod store;

pub use builtins::SystemCommands;
pub use bus::{EventBus, PublishReport, SubscriptionId};
pub use dispatcher::{DispatchMode, Dispatcher, KERNEL};
pub use inflight::InflightTracker;
pub use journal::{ExecutionJournal, LogEntry, VERBOSE_SETTING_KEY};
pub use kernel::{Kernel, KernelBuilder, KernelConfig};
pub use lifecycle::{
    KernelState, LifecycleHook, LifecycleManager, ModulesLifecycleHook, SchedulerLifecycleHook,
    ShutdownSignal,
};
pub use loader::{
    BuiltinBoundaryFactory, BuiltinCatalog, LoadReport, ModuleFilter, ModuleLoader, ModuleSummary,
};
pub use registry::{CapabilityRegistry, HandlerRegistration, RegistryError};
pub use store::MemoryDataStore;
