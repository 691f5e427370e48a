mod job;
mod state;

#[cfg(test)]
pub(crate) use job::sample_details;
pub use job::{Job, JobDetails, JobId, JobSpec, JobStatus, Stamp, UserId};
pub use state::{StateMachine, Transition};
