//! taskdesk client core.
//!
//! A headless client for a hosted workspace task tracker: it signs in against
//! the backend's identity service, caches one workspace's departments, staff,
//! and tasks in memory, merges row-change events into that cache without
//! refetching, and derives notification badges from locally persisted
//! read-state timestamps.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod readstate;
pub mod realtime;
pub mod rows;
pub mod session;
pub mod state;
pub mod store;
pub mod types;

pub use client::Client;
pub use config::BackendConfig;
pub use error::{Error, ErrorCode, Result};
