//! Configuration validation.

use std::collections::HashSet;

use crate::schema::Config;

const DISPATCH_MODES: &[&str] = &["strict", "fallback"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_modules(config, &mut result);
        Self::validate_dispatch(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_lifecycle(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_modules(config: &Config, result: &mut ValidationResult) {
        let modules = &config.modules;

        if modules.root.as_os_str().is_empty() {
            result.add_error(ValidationError::new("modules.root", "must not be empty"));
        } else if !modules.root.exists() {
            result.add_warning(ValidationWarning::new(
                "modules.root",
                format!("{} does not exist; no modules will load", modules.root.display()),
            ));
        }

        let disabled: HashSet<&str> = modules.disabled.iter().map(String::as_str).collect();
        for id in &modules.enabled {
            if disabled.contains(id.as_str()) {
                result.add_error(ValidationError::new(
                    "modules.enabled",
                    format!("'{}' is both enabled and disabled", id),
                ));
            }
        }
    }

    fn validate_dispatch(config: &Config, result: &mut ValidationResult) {
        let mode = config.dispatch.mode.trim().to_ascii_lowercase();
        if !DISPATCH_MODES.contains(&mode.as_str()) {
            result.add_error(ValidationError::new(
                "dispatch.mode",
                format!(
                    "unknown mode '{}', expected one of: {}",
                    config.dispatch.mode,
                    DISPATCH_MODES.join(", ")
                ),
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;
        if !scheduler.enabled {
            return;
        }

        let tick = scheduler.tick_seconds;
        if tick == 0 {
            result.add_error(ValidationError::new(
                "scheduler.tick_seconds",
                "must be greater than 0",
            ));
            return;
        }

        let divides = if tick <= 60 { 60 % tick == 0 } else { tick % 60 == 0 };
        if !divides {
            result.add_warning(ValidationWarning::new(
                "scheduler.tick_seconds",
                format!("{}s does not align with minute boundaries; cron jobs may fire late", tick),
            ));
        }
    }

    fn validate_lifecycle(config: &Config, result: &mut ValidationResult) {
        let lifecycle = &config.lifecycle;

        if lifecycle.shutdown_timeout_seconds == 0 {
            result.add_error(ValidationError::new(
                "lifecycle.shutdown_timeout_seconds",
                "must be greater than 0",
            ));
        }
        if lifecycle.process_response_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "lifecycle.process_response_timeout_ms",
                "must be greater than 0",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!("unrecognized level '{}', falling back to info", config.logging.level),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
