//! Environment registry
//!
//! A single SQLite file at a per-user location is the source of truth shared by
//! every arbor process. This module provides:
//! - Identifier generation (`id`)
//! - The database handle and schema migrations (`db`, `migrations`)
//! - Environment records, status machine and queries (`environment`)

pub mod db;
pub mod environment;
pub mod id;
pub mod migrations;

pub use db::StateDb;
pub use environment::{
    describe_ambiguous, Environment, EnvironmentStatus, ListFilter, PrefixLookup,
};
pub use id::{generate_id, short_id, ID_LENGTH, SHORT_ID_LENGTH};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("environment not found: {0}")]
    NotFound(String),
    #[error("environment already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid ID prefix {0:?}: must be non-empty and contain only hexadecimal characters")]
    InvalidPrefix(String),
    #[error("environment ID is required")]
    MissingId,
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("environment {id}: cannot change status from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: EnvironmentStatus,
        to: EnvironmentStatus,
    },
    #[error("environment {0}: backend ID is already set and cannot be changed")]
    BackendIdImmutable(String),
    #[error("environment {0} was modified concurrently")]
    ConcurrentUpdate(String),
    #[error("corrupt environment row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
    #[error("failed to generate environment ID: {0}")]
    IdGeneration(#[from] rand::Error),
    #[error("cannot determine a data directory for the state database")]
    NoDataDir,
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("migration {version} ({name}) failed: {source}")]
    Migration {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
