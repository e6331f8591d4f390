//! # modhost Protocols
//!
//! Contract definitions for the modhost application kernel.
//! Contains only interface definitions and plain data types - no kernel logic.
//!
//! ## Core Contracts
//!
//! - [`CommandEnvelope`] / [`ResultEnvelope`] - the request/response pair routed by the dispatcher
//! - [`EventEnvelope`] - fire-and-forget pub/sub payload
//! - [`TraceContext`] - explicit per-call correlation id and hop history
//! - [`CommandHandler`], [`EventHandler`], [`JobHandler`], [`CommandValidator`] - capability traits
//! - [`Module`] - the entry point every feature module implements
//! - [`ModuleBoundary`] - the isolation mechanism a module is loaded through
//! - [`DataStore`] - the external key/value persistence collaborator

pub mod boundary;
pub mod capability;
pub mod command;
pub mod error;
pub mod event;
pub mod handler;
pub mod module;
pub mod store;
pub mod trace;
pub mod types;

pub use boundary::{BoundaryFactory, BoundarySpec, ModuleBoundary};
pub use capability::{
    CapabilityKey, CapabilityMetadata, CapabilityStatus, ContractKind, ManifestEntry,
};
pub use command::{CommandEnvelope, Parameters, ResultEnvelope};
pub use error::{BoundaryError, HandlerError, ModuleError, StoreError};
pub use event::EventEnvelope;
pub use handler::{
    CommandHandler, CommandValidator, EventHandler, HandlerRef, JobContext, JobHandler,
    command_fn, event_fn, job_fn, validator_fn,
};
pub use module::{
    Capability, CommandSender, EventPublisher, Module, ModuleContext, ModuleManifest,
    ModuleState, ScheduleSpec, ServiceCollection, ServiceProvider,
};
pub use store::{DataEntry, DataStore, Durability};
pub use trace::{TraceContext, TraceHop};
pub use types::*;
