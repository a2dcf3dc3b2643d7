//! External process execution
//!
//! Every git invocation and every user shell command goes through here. Children
//! are spawned with `kill_on_drop`, so dropping the returned future (a timeout,
//! a `select!` branch losing, an aborted task) terminates the process instead of
//! letting it run to completion.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; callers map exit codes themselves.
pub async fn run_captured(mut cmd: Command) -> Result<ProcessOutput, ProcessError> {
    let program = program_name(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    let output = child
        .wait_with_output()
        .await
        .map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?;

    let result = ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    };
    debug!(program = %program, exit_code = ?result.exit_code, "Process finished");
    Ok(result)
}

/// Run a command attached to the caller's terminal and wait for it to exit.
pub async fn run_interactive(mut cmd: Command) -> Result<ExitStatus, ProcessError> {
    let program = program_name(&cmd);
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    child
        .wait()
        .await
        .map_err(|source| ProcessError::Wait { program, source })
}

/// `git <args>` in `dir`, with inherited `GIT_*` variables removed.
///
/// Variables such as `GIT_DIR` or `GIT_INDEX_FILE` are set when running from
/// inside a git hook and would redirect every call to the wrong repository.
pub fn git_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(dir);
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("GIT_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

/// `<shell> -c <script>` in `dir`
pub fn shell_command(shell: &str, dir: &Path, script: &str) -> Command {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(script).current_dir(dir);
    cmd
}
