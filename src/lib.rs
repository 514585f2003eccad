//! # orgpulse Library
//!
//! Core functionality for the orgpulse sync engine: a GitHub API client with
//! shared rate-limit budgeting, entity mappers, the sync orchestrator, and
//! the relational store boundary.

pub mod config;
pub mod db;
pub mod error;
pub mod github;
pub mod handlers;
pub mod mappers;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod sync;
pub mod telemetry;
pub use migration;
