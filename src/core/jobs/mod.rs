mod dispatcher;
mod types;

pub use dispatcher::{JobDispatcher, ReportAck};
pub use types::{
    Job, JobFilter, JobReport, JobRequest, JobStatus, NewJob, RequestScope, RetryOptions,
};

/// Transitions an agent report may apply. Claiming (`SCHEDULED` to `ACCEPTED`)
/// is not one of them; it only happens through accept. Retry resets bypass this table.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if from == to {
        return !from.is_final();
    }
    match from {
        JobStatus::Unassigned => matches!(to, JobStatus::Scheduled | JobStatus::Failure),
        JobStatus::Scheduled => matches!(to, JobStatus::Unassigned | JobStatus::Failure),
        JobStatus::Accepted => matches!(
            to,
            JobStatus::Success | JobStatus::Failure | JobStatus::Scheduled | JobStatus::Unassigned
        ),
        JobStatus::Success | JobStatus::Failure => false,
    }
}

#[cfg(test)]
mod tests;
