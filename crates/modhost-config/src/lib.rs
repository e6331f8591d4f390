//! # modhost config
//!
//! TOML configuration for the modhost host: schema with defaults for every
//! section, a loader that expands `${VAR}` and `~`, and a validator.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
