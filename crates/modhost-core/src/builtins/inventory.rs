//! `System.Modules` and `System.Jobs`.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use modhost_protocols::{
    CommandEnvelope, CommandHandler, HandlerError, ResultEnvelope, TraceContext,
};
use modhost_scheduler::JobScheduler;

use crate::loader::ModuleLoader;

pub struct ModulesCommand {
    loader: Option<Weak<ModuleLoader>>,
}

impl ModulesCommand {
    pub fn new(loader: Option<Weak<ModuleLoader>>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl CommandHandler for ModulesCommand {
    async fn handle(
        &self,
        _command: &CommandEnvelope,
        _trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        let modules = self
            .loader
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|loader| loader.list_modules())
            .unwrap_or_default();

        let data = serde_json::to_value(&modules).map_err(HandlerError::execution)?;
        Ok(ResultEnvelope::success(format!("{} modules", modules.len())).with_data(data))
    }
}

pub struct JobsCommand {
    scheduler: Option<Arc<JobScheduler>>,
}

impl JobsCommand {
    pub fn new(scheduler: Option<Arc<JobScheduler>>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl CommandHandler for JobsCommand {
    async fn handle(
        &self,
        _command: &CommandEnvelope,
        _trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(ResultEnvelope::success("no scheduler attached").with_data(Value::Array(vec![])));
        };

        let jobs = scheduler.list_jobs();
        let data = serde_json::to_value(&jobs).map_err(HandlerError::execution)?;
        Ok(ResultEnvelope::success(format!("{} jobs", jobs.len())).with_data(data))
    }
}
