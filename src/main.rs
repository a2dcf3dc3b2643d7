use anyhow::{bail, Context, Result};
use arbor_core::backend::BackendRegistry;
use arbor_core::config::{self, CreateRequest, FlagOverrides, RepositoryInfo};
use arbor_core::git::{self, GitError};
use arbor_core::state::{generate_id, short_id, Environment, EnvironmentStatus, ListFilter, StateDb};
use arbor_core::util::{init_logging, shell};
use arbor_core::workspace::{CreateOptions, EnvironmentManager, ManagerError, RemoveOptions};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(version, about = "Isolated git-worktree environments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new environment and print its short id
    Create {
        /// Branch to start from (default: current branch)
        #[arg(long)]
        base: Option<String>,
        /// Override the default backend
        #[arg(long)]
        backend: Option<String>,
        /// Skip environment, file mounts and setup commands
        #[arg(long)]
        no_setup: bool,
    },
    /// List environments
    List {
        /// Include failed and removed environments
        #[arg(short, long)]
        all: bool,
        #[arg(long)]
        backend: Option<String>,
        /// Only environments of this repository
        #[arg(long)]
        repo: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Show an environment and its workspace state
    Status {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Run a command inside an environment
    Exec {
        id: String,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Open an interactive shell inside an environment
    Shell { id: String },
    /// Destroy an environment's workspace and forget it
    Rm {
        id: String,
        /// Skip confirmation for ready environments
        #[arg(short, long)]
        force: bool,
        /// Keep the record, marked as removed
        #[arg(long)]
        keep_record: bool,
    },
}

#[tokio::main]
async fn main() {
    init_logging("warn");

    match run(Cli::parse()).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            match e.downcast_ref::<ManagerError>() {
                Some(ManagerError::Ambiguous { .. }) => eprintln!("{e}"),
                _ => eprintln!("error: {e:#}"),
            }
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let global = config::load_global_config().context("failed to load global config")?;
    let db = StateDb::open_default()
        .await
        .context("failed to open state database")?;
    let manager = EnvironmentManager::new(db, Arc::new(BackendRegistry::with_builtin()), global);

    let code = match cli.command {
        Commands::Create {
            base,
            backend,
            no_setup,
        } => {
            create(&manager, base, backend, no_setup).await?;
            0
        }
        Commands::List {
            all,
            backend,
            repo,
            json,
        } => {
            let repo_path = match repo {
                Some(path) => Some(repository_root(&path).await?),
                None => None,
            };
            let filter = ListFilter {
                repo_path,
                backend,
                statuses: if all {
                    Vec::new()
                } else {
                    EnvironmentStatus::default_listing()
                },
            };
            let envs = manager.list(&filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&envs)?);
            } else {
                print_table(&envs);
            }
            0
        }
        Commands::Status { id, json } => {
            let report = manager.status(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let env = &report.environment;
                println!("ID:       {}", env.id);
                println!("Status:   {}", env.status);
                println!("Backend:  {}", env.backend);
                println!("Branch:   {} (from {})", env.branch_name, env.base_branch);
                println!("Repo:     {}", env.repo_path.display());
                if let Some(url) = &env.remote_url {
                    println!("Remote:   {url}");
                }
                println!("Created:  {}", env.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
                if let Some(path) = &env.backend_id {
                    println!("Path:     {path}");
                }
                if let Some(status) = &report.backend {
                    println!("Workspace: {} ({})", status.state, status.message);
                }
            }
            0
        }
        Commands::Exec { id, command } => {
            let output = manager.exec(&id, &shell_words(&command)).await?;
            print!("{}", output.output);
            std::io::stdout().flush()?;
            output.exit_code
        }
        Commands::Shell { id } => manager.shell(&id).await?,
        Commands::Rm {
            id,
            force,
            keep_record,
        } => {
            let env = manager.resolve(&id).await?;
            if env.status == EnvironmentStatus::Ready && !force && !confirm(&env)? {
                println!("Cancelled.");
                return Ok(0);
            }
            manager
                .remove(&env.id, &RemoveOptions { keep_record })
                .await?;
            println!("Removed {}", env.short_id());
            0
        }
    };
    Ok(code)
}

async fn create(
    manager: &EnvironmentManager,
    base: Option<String>,
    backend: Option<String>,
    no_setup: bool,
) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let repo_root = git::repo_root(&cwd)
        .await
        .context("not in a git repository")?;
    let remote_url = git::remote_url(&repo_root, "origin").await.ok();

    let base_branch = match base {
        Some(base) => base,
        None => match git::current_branch(&repo_root).await {
            Ok(branch) => branch,
            Err(GitError::DetachedHead) => bail!(
                "cannot create environment from detached HEAD, use --base to specify a branch"
            ),
            Err(e) => return Err(e).context("failed to get current branch"),
        },
    };

    let flags = FlagOverrides {
        backend,
        ..Default::default()
    };
    let resolved = config::resolve(&cwd, &flags).context("failed to load config")?;
    let repository = RepositoryInfo {
        path: repo_root,
        remote_url,
        base_branch,
    };
    let id = generate_id().context("failed to generate environment ID")?;
    let request = CreateRequest::new(resolved, repository, id)?;

    match manager
        .create(&request, &CreateOptions { run_setup: !no_setup })
        .await
    {
        Ok(env) => {
            println!("{}", env.short_id());
            Ok(())
        }
        Err(e) => {
            if let Some(id) = e.failed_environment() {
                eprintln!(
                    "environment {} marked failed; inspect with \"arbor status {}\"",
                    short_id(id),
                    short_id(id)
                );
            }
            Err(e.into())
        }
    }
}

/// Rejoin argv for `sh -c` so each argument stays one word
fn shell_words(args: &[String]) -> String {
    match args {
        // A lone argument is taken as a script: `arbor exec ID -- 'make && make test'`
        [script] => script.clone(),
        _ => args
            .iter()
            .map(|arg| shell::quote(arg))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Repository root as recorded on environments, for `--repo` filtering
async fn repository_root(path: &Path) -> Result<PathBuf> {
    let path = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("no such directory: {}", path.display()))?;
    match git::main_repo_root(&path).await {
        Ok(root) => Ok(root),
        Err(_) => Ok(path),
    }
}

fn confirm(env: &Environment) -> Result<bool> {
    print!("Environment {} is ready. Remove it? [y/N] ", env.short_id());
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read response")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_table(envs: &[Environment]) {
    if envs.is_empty() {
        println!("No environments");
        return;
    }
    println!(
        "{:<12}  {:<12}  {:<10}  {:<24}  CREATED",
        "ID", "STATUS", "BACKEND", "BRANCH"
    );
    for env in envs {
        println!(
            "{:<12}  {:<12}  {:<10}  {:<24}  {}",
            env.short_id(),
            env.status.as_str(),
            env.backend,
            env.branch_name,
            env.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}
