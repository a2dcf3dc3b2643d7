//! Host setup runner
//!
//! Runs directly on the host filesystem, in three phases: environment export
//! file, file mounts, setup commands. A failure stops the run where it
//! happened; nothing already applied is rolled back.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::ENV_FILE;
use crate::backend::{SetupConfig, SetupError, SetupRunner};
use crate::config::FileMount;
use crate::util::process::{run_captured, shell_command};
use crate::util::shell::{self, POSIX_SHELL};

const ENV_FILE_HEADER: &str =
    "# arbor environment variables\n# This file is generated during setup. Do not edit.\n\n";

pub struct HostSetupRunner {
    work_dir: PathBuf,
}

impl HostSetupRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn env_path(&self) -> PathBuf {
        self.work_dir.join(ENV_FILE)
    }

    async fn write_environment(&self, env: &BTreeMap<String, String>) -> Result<(), SetupError> {
        if env.is_empty() {
            return Ok(());
        }
        if let Some(name) = env.keys().find(|name| !shell::is_valid_env_name(name)) {
            return Err(SetupError::InvalidVariableName(name.clone()));
        }

        let path = self.env_path();
        tokio::fs::write(&path, render_env_file(env))
            .await
            .map_err(|source| SetupError::EnvFile {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), count = env.len(), "Environment file written");
        Ok(())
    }

    async fn apply_mounts(&self, files: &[FileMount]) -> Result<(), SetupError> {
        for mount in files {
            let target = if mount.target.is_absolute() {
                mount.target.clone()
            } else {
                self.work_dir.join(&mount.target)
            };
            let mount = FileMount {
                target,
                ..mount.clone()
            };

            // Copies can be large; keep them off the async worker threads.
            let applied = mount.clone();
            tokio::task::spawn_blocking(move || apply_mount(&applied))
                .await
                .map_err(|e| SetupError::Mount {
                    source_path: mount.source.clone(),
                    target: mount.target.clone(),
                    source: std::io::Error::other(e),
                })??;

            info!(
                source = %mount.source.display(),
                target = %mount.target.display(),
                readonly = mount.readonly,
                "File mounted"
            );
        }
        Ok(())
    }

    async fn run_commands(&self, commands: &[String]) -> Result<(), SetupError> {
        let env_path = self.env_path();
        for (i, command) in commands.iter().enumerate() {
            let index = i + 1;
            let env_file = env_path.is_file().then_some(env_path.as_path());
            let script = shell::sourced_script(env_file, command);

            info!(index, command = %command, "Running setup command");
            let output = run_captured(shell_command(POSIX_SHELL, &self.work_dir, &script))
                .await
                .map_err(|source| SetupError::CommandSpawn { index, source })?;
            debug!(index, output = %output.combined(), "Setup command output");

            if !output.success() {
                warn!(index, command = %command, exit_code = ?output.exit_code, "Setup command failed");
                return Err(SetupError::CommandFailed {
                    index,
                    command: command.clone(),
                    exit_code: output.exit_code,
                    output: output.combined(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SetupRunner for HostSetupRunner {
    async fn run(&self, config: &SetupConfig) -> Result<(), SetupError> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(SetupError::WorkDirNotSet);
        }
        self.write_environment(&config.environment).await?;
        self.apply_mounts(&config.files).await?;
        self.run_commands(&config.commands).await?;
        Ok(())
    }
}

/// `export NAME='value'` lines in key order
fn render_env_file(env: &BTreeMap<String, String>) -> String {
    let mut out = String::from(ENV_FILE_HEADER);
    for (name, value) in env {
        out.push_str(&format!("export {}={}\n", name, shell::quote(value)));
    }
    out
}

fn apply_mount(mount: &FileMount) -> Result<(), SetupError> {
    let source = &mount.source;
    let target = &mount.target;
    let mount_err = |source_err: std::io::Error| SetupError::Mount {
        source_path: source.clone(),
        target: target.clone(),
        source: source_err,
    };

    let source_meta = fs::metadata(source).map_err(|_| SetupError::SourceNotFound(source.clone()))?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(mount_err)?;
    }
    remove_existing(target).map_err(mount_err)?;

    if mount.readonly {
        std::os::unix::fs::symlink(source, target).map_err(mount_err)?;
    } else if source_meta.is_dir() {
        copy_dir(source, target).map_err(mount_err)?;
    } else {
        fs::copy(source, target).map_err(mount_err)?;
    }
    Ok(())
}

/// Remove whatever sits at `path` without following a symlink there
fn remove_existing(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursive copy; symlinks inside the tree are recreated, not followed
fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let dest = target.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
