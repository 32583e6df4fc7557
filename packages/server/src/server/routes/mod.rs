pub mod accounts;
pub mod actions;
pub mod health;
pub mod jobs;
pub mod queue;
pub mod stream;
