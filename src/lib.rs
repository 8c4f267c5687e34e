//! # Calendar Sync Core
//!
//! Multi-tenant calendar synchronization and availability: provider
//! adapters, webhook ingestion, recurrence expansion, availability windows,
//! and the background sync machinery.

pub mod adapters;
pub mod availability;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod rate_limit;
pub mod recurrence;
pub mod repositories;
pub mod server;
pub mod service;
pub mod sync;
pub mod telemetry;
pub mod webhooks;

pub use migration;
