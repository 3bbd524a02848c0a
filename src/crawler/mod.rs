pub mod analyzer;
pub mod controller;
pub mod interrupt;
pub mod link;
pub mod seeker;
pub mod spider;
pub mod task;
pub mod update;

// Re-export common types
pub use controller::{ScrapeService, ServiceError, TaskFeed};
pub use link::parse_task_link;
pub use task::{Task, TaskId, TaskSummary};
