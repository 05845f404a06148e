//! Application services layer: adapter contracts and the consistency coordinator.

pub mod availability;
pub mod coordinator;
pub mod error;
pub mod reindex;
pub mod repos;
