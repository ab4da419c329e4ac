pub mod agents;
pub mod config;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod results;
pub mod scheduler;
pub mod stages;
pub mod store;
pub mod terminal;
