//! Infrastructure layer - External adapters and implementations
//!
//! This layer contains:
//! - Persistence: in-memory and SQLite ledger and event log adapters
//! - Event bus: in-process fan-out of storage events
//! - HTTP: REST API routes
//! - Config: Application configuration
//! - State: Shared application state
//! - Storage workers: event logging and periodic ledger audits

pub mod config;
pub mod event_bus;
pub mod http;
pub mod persistence;
pub mod state;
pub mod storage_workers;
