//! Application services: token lifecycle, business data, jobs.

pub mod background;
pub mod broker;
pub mod business;
pub mod error;
pub mod jobs;
pub mod rate_limit;
pub mod repos;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;
