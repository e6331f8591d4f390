//! Error types for the modhost protocol layer.

mod boundary;
mod handler;
mod module;
mod store;

pub use boundary::*;
pub use handler::*;
pub use module::*;
pub use store::*;
