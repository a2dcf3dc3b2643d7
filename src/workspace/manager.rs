//! Environment orchestration
//!
//! Sequences the registry and a backend so that every environment is either
//! fully provisioned (`Ready`) or left behind as a `Failed` row that records
//! what was attempted.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{
    Backend, BackendError, BackendRegistry, BackendStatus, ExecOutput, SetupConfig, SetupError,
};
use crate::config::{BackendConfig, ConfigError, CreateRequest, GlobalConfig};
use crate::git::GitError;
use crate::state::{
    describe_ambiguous, short_id, Environment, EnvironmentStatus, ListFilter, PrefixLookup,
    StateDb, StateError,
};

/// Backend type assumed for records whose backend is no longer configured
const FALLBACK_BACKEND_TYPE: &str = crate::config::types::DEFAULT_BACKEND_TYPE;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("environment {0:?} not found")]
    NotFound(String),
    #[error("{}", describe_ambiguous(prefix, candidates))]
    Ambiguous {
        prefix: String,
        candidates: Vec<Environment>,
    },
    #[error("environment {} has no workspace", short_id(.0))]
    NotProvisioned(String),
    #[error("environment {} failed: {source}", short_id(id))]
    CreateFailed {
        id: String,
        #[source]
        source: Box<ManagerError>,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Git(#[from] GitError),
}

impl ManagerError {
    /// Id of the environment a failed creation left behind
    pub fn failed_environment(&self) -> Option<&str> {
        match self {
            ManagerError::CreateFailed { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Apply environment, mounts and setup commands after creation
    pub run_setup: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self { run_setup: true }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Keep the row as `Removed` instead of deleting it
    pub keep_record: bool,
}

/// Registry record together with what the backend observes right now
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub environment: Environment,
    /// `None` until the backend created a workspace
    pub backend: Option<BackendStatus>,
}

pub struct EnvironmentManager {
    db: StateDb,
    backends: Arc<BackendRegistry>,
    global: GlobalConfig,
}

impl EnvironmentManager {
    pub fn new(db: StateDb, backends: Arc<BackendRegistry>, global: GlobalConfig) -> Self {
        Self {
            db,
            backends,
            global,
        }
    }

    pub fn db(&self) -> &StateDb {
        &self.db
    }

    /// Provision a new environment.
    ///
    /// The registry row is written before anything else happens. Any later
    /// failure leaves it as `Failed` and is returned as
    /// `ManagerError::CreateFailed` carrying the id.
    pub async fn create(
        &self,
        request: &CreateRequest,
        options: &CreateOptions,
    ) -> Result<Environment, ManagerError> {
        let mut env = Environment {
            id: request.id.clone(),
            backend: request.backend.name.clone(),
            backend_id: None,
            repo_path: request.repository.path.clone(),
            remote_url: request.repository.remote_url.clone(),
            branch_name: request.branch_name(),
            base_branch: request.base_ref().to_string(),
            created_at: Utc::now(),
            status: EnvironmentStatus::Provisioning,
        };
        self.db.create_environment(&env).await?;
        info!(env_id = %env.id, backend = %env.backend, "Provisioning environment");

        match self.provision(&mut env, request, options).await {
            Ok(()) => {
                info!(env_id = %env.id, "Environment ready");
                Ok(env)
            }
            Err(e) => {
                warn!(env_id = %env.id, error = %e, "Provisioning failed");
                self.mark_failed(&mut env).await;
                Err(ManagerError::CreateFailed {
                    id: env.id.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn provision(
        &self,
        env: &mut Environment,
        request: &CreateRequest,
        options: &CreateOptions,
    ) -> Result<(), ManagerError> {
        let backend = self.backends.get(&request.backend)?;
        let backend_id = backend.create(request).await?;

        env.backend_id = Some(backend_id.clone());
        if let Err(e) = self.db.update_environment(env).await {
            // The row cannot point at the workspace, so the workspace goes.
            if let Err(discard_err) = backend.discard(request, &backend_id).await {
                warn!(env_id = %env.id, error = %discard_err, "Failed to discard orphaned workspace");
            }
            env.backend_id = None;
            return Err(e.into());
        }

        if options.run_setup && request.has_setup_work() {
            let runner = backend.setup_runner(&backend_id);
            runner.run(&SetupConfig::from(request)).await?;
        }

        env.status = EnvironmentStatus::Ready;
        self.db.update_environment(env).await?;
        Ok(())
    }

    async fn mark_failed(&self, env: &mut Environment) {
        env.status = EnvironmentStatus::Failed;
        if let Err(e) = self.db.update_environment(env).await {
            warn!(env_id = %env.id, error = %e, "Failed to mark environment as failed");
        }
    }

    /// Environment whose id starts with `prefix`
    pub async fn resolve(&self, prefix: &str) -> Result<Environment, ManagerError> {
        match self.db.get_environment_by_prefix(prefix).await? {
            PrefixLookup::Found(env) => Ok(env),
            PrefixLookup::NotFound => Err(ManagerError::NotFound(prefix.to_string())),
            PrefixLookup::Ambiguous(candidates) => Err(ManagerError::Ambiguous {
                prefix: prefix.to_string(),
                candidates,
            }),
        }
    }

    pub async fn status(&self, prefix: &str) -> Result<StatusReport, ManagerError> {
        let environment = self.resolve(prefix).await?;
        let backend = match &environment.backend_id {
            Some(backend_id) => {
                let backend = self.backend_for(&environment)?;
                Some(backend.status(backend_id).await)
            }
            None => None,
        };
        Ok(StatusReport {
            environment,
            backend,
        })
    }

    pub async fn exec(&self, prefix: &str, command: &str) -> Result<ExecOutput, ManagerError> {
        let env = self.resolve(prefix).await?;
        let backend_id = Self::require_backend_id(&env)?;
        Ok(self.backend_for(&env)?.exec(backend_id, command).await?)
    }

    /// Interactive shell in the environment's workspace; returns its exit code
    pub async fn shell(&self, prefix: &str) -> Result<i32, ManagerError> {
        let env = self.resolve(prefix).await?;
        let backend_id = Self::require_backend_id(&env)?;
        Ok(self.backend_for(&env)?.shell(backend_id).await?)
    }

    /// Destroy the workspace and delete (or retire) the record.
    ///
    /// Backend failures are logged and never stop the record from going away.
    pub async fn remove(
        &self,
        prefix: &str,
        options: &RemoveOptions,
    ) -> Result<Environment, ManagerError> {
        let mut env = self.resolve(prefix).await?;
        if options.keep_record && !env.status.can_transition_to(EnvironmentStatus::Removed) {
            return Err(StateError::InvalidTransition {
                id: env.id.clone(),
                from: env.status,
                to: EnvironmentStatus::Removed,
            }
            .into());
        }

        if let Some(backend_id) = &env.backend_id {
            let destroyed = match self.backend_for(&env) {
                Ok(backend) => backend.destroy(backend_id).await.map_err(ManagerError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = destroyed {
                warn!(env_id = %env.id, error = %e, "Failed to destroy workspace");
            }
        }

        if options.keep_record {
            env.status = EnvironmentStatus::Removed;
            self.db.update_environment(&env).await?;
        } else {
            self.db.delete_environment(&env.id).await?;
        }
        info!(env_id = %env.id, kept = options.keep_record, "Environment removed");
        Ok(env)
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Environment>, ManagerError> {
        Ok(self.db.list_environments(filter).await?)
    }

    fn require_backend_id(env: &Environment) -> Result<&str, ManagerError> {
        env.backend_id
            .as_deref()
            .ok_or_else(|| ManagerError::NotProvisioned(env.id.clone()))
    }

    /// Backend that owns `env`, configured the way it is configured now
    fn backend_for(&self, env: &Environment) -> Result<Arc<dyn Backend>, ManagerError> {
        let config = match self.global.backends.get(&env.backend) {
            Some(settings) => BackendConfig {
                workspace_root: settings
                    .workspace_root
                    .as_deref()
                    .map(crate::config::expand::expand_dir),
                ..BackendConfig::new(env.backend.clone(), settings.backend_type.clone())
            },
            None => {
                warn!(
                    env_id = %env.id,
                    backend = %env.backend,
                    "Backend is no longer configured, assuming {FALLBACK_BACKEND_TYPE}"
                );
                BackendConfig::new(env.backend.clone(), FALLBACK_BACKEND_TYPE)
            }
        };
        Ok(self.backends.get(&config)?)
    }
}
