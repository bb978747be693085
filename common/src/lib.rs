// Common library for the interval scheduler: job table, broker, scheduler loop
// and job manager

pub mod config;
pub mod db;
pub mod errors;
pub mod health;
pub mod manager;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
