//! # modhost diagnostics module
//!
//! A builtin feature module, linked into the host and loaded through the
//! builtin boundary under the catalog entry [`ENTRY`].
//!
//! ## Capabilities
//!
//! - `Diagnostics.Ping`: liveness probe with uptime and counters
//! - `Diagnostics.Warnings`: recent `system.warning` events
//! - `Diagnostics.Heartbeat` job: publishes `diagnostics.heartbeat`
//! - subscriber on `system.warning`
//!
//! It also contributes a [`DiagnosticsStats`] service in the configuration
//! phase, so other modules can read the same counters.

mod module;
mod stats;

pub use module::{
    DiagnosticsModule, ENTRY, HEARTBEAT_JOB, HEARTBEAT_TOPIC, LAST_HEARTBEAT_KEY, PING, WARNINGS,
};
pub use stats::{DiagnosticsStats, WarningRecord};
