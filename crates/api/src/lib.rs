//! HTTP surface of the labelling service: assignment, release, submission
//! and statistics endpoints.

pub mod app;
pub mod context;
pub mod middleware;
