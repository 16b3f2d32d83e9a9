pub mod classifier;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
