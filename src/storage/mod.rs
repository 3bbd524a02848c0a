pub mod tasks;

// Re-export common types
pub use tasks::{StorageError, TaskStorage, TaskStore};
