//! Data Transfer Objects - For API boundaries
//!
//! DTOs live in the application layer so the HTTP adapter can
//! serialize/deserialize without shaping the domain model around JSON.

pub mod storage;

pub use storage::*;
