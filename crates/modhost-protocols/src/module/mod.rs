//! Module protocol definitions.
//!
//! A module is a separately packaged unit of functionality that contributes
//! capabilities to a running kernel.

mod capability;
mod context;
mod manifest;
mod services;
mod traits;

pub use capability::*;
pub use context::*;
pub use manifest::*;
pub use services::*;
pub use traits::*;
