pub mod agents;
pub mod jobs;
pub mod protocol;
pub mod scheduling;
pub mod triggers;
