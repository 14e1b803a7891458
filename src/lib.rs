//! Marketplace backend: tenant credential lifecycle, cached business data and
//! scheduled maintenance.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod scheduler;
