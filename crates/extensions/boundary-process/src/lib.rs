//! # modhost process boundary
//!
//! Runs a module as a child process and talks to it over newline-delimited
//! JSON on stdin/stdout.
//!
//! - Host side: [`ProcessBoundaryFactory`] creates a [`ProcessBoundary`] per
//!   manifest whose `[boundary] kind = "process"`. Each instance it hands out
//!   is a proxy [`Module`](modhost_protocols::Module) whose handlers forward
//!   calls over the pipe.
//! - Module side: [`ModuleServer`] serves the protocol for a set of
//!   [`Capability`](modhost_protocols::Capability) values, so a module binary
//!   writes ordinary handlers with the same traits the kernel uses.
//!
//! See [`protocol`] for the frame layout.

mod boundary;
mod proxy;
mod server;
mod transport;

pub mod protocol;

pub use boundary::{ProcessBoundary, ProcessBoundaryFactory};
pub use proxy::ProcessModule;
pub use server::{ModuleServer, Notifier};
pub use transport::ProcessTransport;
