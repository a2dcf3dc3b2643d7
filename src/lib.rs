//! arbor - isolated git-worktree environments tracked in a local registry

pub mod backend;
pub mod config;
pub mod git;
pub mod state;
pub mod util;
pub mod workspace;
