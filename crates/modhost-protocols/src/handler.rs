//! Handler contracts for the four capability kinds.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::capability::ContractKind;
use crate::command::{CommandEnvelope, ResultEnvelope};
use crate::error::HandlerError;
use crate::event::EventEnvelope;
use crate::trace::TraceContext;

/// Handles a named command and produces a result.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError>;
}

/// Reacts to a published event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Executes a scheduled or manually triggered job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<(), HandlerError>;
}

/// Pre-flight check run before a command's handler.
///
/// Any `Err` short-circuits dispatch with a failure result.
#[async_trait]
pub trait CommandValidator: Send + Sync {
    async fn validate(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<(), HandlerError>;
}

/// Context passed to a job run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    pub trace: TraceContext,
    pub last_run: Option<DateTime<Utc>>,
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(job_name: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            job_name: job_name.into(),
            trace: TraceContext::new(),
            last_run: None,
            cancellation,
        }
    }

    pub fn with_last_run(mut self, last_run: Option<DateTime<Utc>>) -> Self {
        self.last_run = last_run;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A registered handler of any kind.
#[derive(Clone)]
pub enum HandlerRef {
    Command(Arc<dyn CommandHandler>),
    Event(Arc<dyn EventHandler>),
    Job(Arc<dyn JobHandler>),
    Validator(Arc<dyn CommandValidator>),
}

impl HandlerRef {
    pub fn kind(&self) -> ContractKind {
        match self {
            HandlerRef::Command(_) => ContractKind::Command,
            HandlerRef::Event(_) => ContractKind::Event,
            HandlerRef::Job(_) => ContractKind::Job,
            HandlerRef::Validator(_) => ContractKind::Validator,
        }
    }

    pub fn as_command(&self) -> Option<&Arc<dyn CommandHandler>> {
        match self {
            HandlerRef::Command(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Arc<dyn EventHandler>> {
        match self {
            HandlerRef::Event(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<&Arc<dyn JobHandler>> {
        match self {
            HandlerRef::Job(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_validator(&self) -> Option<&Arc<dyn CommandValidator>> {
        match self {
            HandlerRef::Validator(h) => Some(h),
            _ => None,
        }
    }
}

impl std::fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HandlerRef::{}", self.kind())
    }
}

// Closure adapters, mostly for built-ins and tests.

struct FnCommandHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnCommandHandler<F>
where
    F: Fn(CommandEnvelope, TraceContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResultEnvelope, HandlerError>> + Send,
{
    async fn handle(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        (self.0)(command.clone(), trace.clone()).await
    }
}

struct FnEventHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

struct FnJobHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnJobHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn execute(&self, ctx: &JobContext) -> Result<(), HandlerError> {
        (self.0)(ctx.clone()).await
    }
}

struct FnValidator<F>(F);

#[async_trait]
impl<F, Fut> CommandValidator for FnValidator<F>
where
    F: Fn(CommandEnvelope, TraceContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn validate(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<(), HandlerError> {
        (self.0)(command.clone(), trace.clone()).await
    }
}

/// Wrap an async closure as a [`CommandHandler`].
pub fn command_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandEnvelope, TraceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResultEnvelope, HandlerError>> + Send + 'static,
{
    Arc::new(FnCommandHandler(f))
}

/// Wrap an async closure as an [`EventHandler`].
pub fn event_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnEventHandler(f))
}

/// Wrap an async closure as a [`JobHandler`].
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnJobHandler(f))
}

/// Wrap an async closure as a [`CommandValidator`].
pub fn validator_fn<F, Fut>(f: F) -> Arc<dyn CommandValidator>
where
    F: Fn(CommandEnvelope, TraceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnValidator(f))
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
