pub mod cache;
pub mod history;
pub mod scheduler;
