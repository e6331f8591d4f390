//! # modhost Scheduler
//!
//! Time-driven background execution for module-provided jobs.
//!
//! A single timing loop wakes once per tick (by default at every minute
//! boundary), evaluates each registered job's [`Schedule`] and runs the due
//! ones. Every job carries an overlap guard: its handler is never invoked
//! while a previous run of the same job is still in flight, whether the run
//! came from the loop or from [`JobScheduler::trigger`].

mod error;
mod job;
mod schedule;
mod scheduler;

pub use error::{ScheduleParseError, SchedulerError};
pub use job::{JobDescriptor, JobRegistration, JobResolver, TriggerOutcome};
pub use schedule::{CronSchedule, Schedule};
pub use scheduler::{JobScheduler, SchedulerConfig};
