//! Fault barrier for hosted code.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use modhost_protocols::{HandlerError, ModuleError};

/// Await hosted code, turning a panic into [`HandlerError::Panicked`].
///
/// Nothing raised inside `fut` escapes as an unwind.
pub async fn contain<T, F>(fut: F) -> Result<T, HandlerError>
where
    F: Future<Output = Result<T, HandlerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::from_panic(payload)),
    }
}

/// Await a module lifecycle hook. A panic becomes `wrap(message)`.
pub async fn contain_lifecycle<T, F>(
    fut: F,
    wrap: fn(String) -> ModuleError,
) -> Result<T, ModuleError>
where
    F: Future<Output = Result<T, ModuleError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(wrap(HandlerError::from_panic(payload).to_string())),
    }
}
