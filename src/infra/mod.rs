//! Infrastructure adapters and runtime bootstrap.

pub mod broker;
pub mod db;
pub mod error;
pub mod telemetry;
