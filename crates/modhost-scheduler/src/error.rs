//! Scheduler errors.

use thiserror::Error;

/// Error parsing a cron expression or schedule spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleParseError {
    #[error("expected 5 cron fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("step of zero in {0} field")]
    ZeroStep(&'static str),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid schedule for job {job}: {source}")]
    InvalidSchedule {
        job: String,
        #[source]
        source: ScheduleParseError,
    },

    #[error("Scheduler already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ScheduleParseError::FieldCount(6).to_string(),
            "expected 5 cron fields, found 6"
        );
        let err = ScheduleParseError::OutOfRange {
            field: "minute",
            value: 61,
            min: 0,
            max: 59,
        };
        assert_eq!(err.to_string(), "minute value 61 out of range 0-59");
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::InvalidSchedule {
            job: "Nightly".to_string(),
            source: ScheduleParseError::ZeroStep("hour"),
        };
        let display = err.to_string();
        assert!(display.contains("Nightly"));
        assert!(display.contains("step of zero"));

        assert_eq!(
            SchedulerError::JobNotFound("x".into()).to_string(),
            "Job not found: x"
        );
    }
}
