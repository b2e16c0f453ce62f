pub mod executions;
pub mod jobs;
pub mod webhooks;
pub mod workflows;
