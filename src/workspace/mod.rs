//! Environment orchestration
//!
//! Ties the registry, the backend registry and the resolved configuration
//! together:
//! - create: registry row -> backend create -> setup -> status
//! - resolve / status / exec / shell by id prefix
//! - remove, with best-effort workspace destruction

pub mod manager;

pub use manager::{
    CreateOptions, EnvironmentManager, ManagerError, RemoveOptions, StatusReport,
};
