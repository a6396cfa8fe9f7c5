//! Data types for messages, decisions, configuration, run stats and queries.

pub mod config;
pub mod decision;
pub mod message;
pub mod query;
pub mod stats;
