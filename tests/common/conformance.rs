//! Contract checks any `Backend` must pass.
//!
//! Every case provisions its own workspace from `repo`, inspects it only
//! through the backend (`exec`, `status`), and destroys it afterwards, so the
//! same suite runs unchanged against substrates that are not local
//! directories.

use arbor_core::backend::{Backend, SetupConfig, SetupError, WorkspaceState};
use arbor_core::config::{BackendConfig, CreateRequest, FileMount, RepositoryInfo, ResolvedConfig};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const MISSING: &str = "/nonexistent/arbor-conformance";

pub async fn run_suite(backend: Arc<dyn Backend>, repo: &Path) {
    let suite = Suite::new(backend, repo);
    suite.lifecycle().await;
    suite.file_mounts().await;
    suite.environment().await;
    suite.setup_commands().await;
}

struct Suite {
    backend: Arc<dyn Backend>,
    repo: PathBuf,
    fixtures: TempDir,
    next: AtomicU32,
}

/// A provisioned workspace, destroyed by `finish`
struct Workspace<'a> {
    backend: &'a dyn Backend,
    id: String,
}

impl Workspace<'_> {
    async fn setup(&self, config: SetupConfig) -> Result<(), SetupError> {
        self.backend.setup_runner(&self.id).run(&config).await
    }

    async fn exec(&self, command: &str) -> (String, i32) {
        let out = self
            .backend
            .exec(&self.id, command)
            .await
            .unwrap_or_else(|e| panic!("exec {command:?} failed: {e}"));
        (out.output, out.exit_code)
    }

    async fn must_exec(&self, command: &str) -> String {
        let (output, code) = self.exec(command).await;
        assert_eq!(code, 0, "{command:?} exited {code}: {output}");
        output
    }

    async fn assert_content(&self, path: &str, expected: &str) {
        let output = self.must_exec(&format!("cat '{path}'")).await;
        assert_eq!(output.trim_end(), expected, "content of {path}");
    }

    async fn assert_env(&self, name: &str, expected: &str) {
        let output = self.must_exec(&format!("printf '%s' \"${name}\"")).await;
        assert_eq!(output, expected, "value of {name}");
    }

    async fn finish(self) {
        self.backend.destroy(&self.id).await.unwrap();
        assert_eq!(
            self.backend.status(&self.id).await.state,
            WorkspaceState::NotFound
        );
    }
}

impl Suite {
    fn new(backend: Arc<dyn Backend>, repo: &Path) -> Self {
        let fixtures = TempDir::new().unwrap();
        fs::write(fixtures.path().join("simple.txt"), "hello world").unwrap();
        let config_dir = fixtures.path().join("config-dir");
        fs::create_dir_all(config_dir.join("nested")).unwrap();
        fs::write(config_dir.join("app.yaml"), "key: value").unwrap();
        fs::write(config_dir.join("nested/deep.txt"), "deep content").unwrap();

        Self {
            backend,
            repo: repo.to_path_buf(),
            fixtures,
            next: AtomicU32::new(1),
        }
    }

    fn fixture(&self, name: &str) -> PathBuf {
        self.fixtures.path().join(name)
    }

    /// Fresh workspace with a distinct short id
    async fn workspace(&self) -> Workspace<'_> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let id = format!("{n:012x}{}", "c".repeat(20));
        let resolved = ResolvedConfig {
            backend: BackendConfig::new("conformance", self.backend.kind()),
            branch_prefix: "env/".to_string(),
            environment: BTreeMap::new(),
            files: Vec::new(),
            setup_commands: Vec::new(),
        };
        let repository = RepositoryInfo {
            path: self.repo.clone(),
            remote_url: None,
            base_branch: "HEAD".to_string(),
        };
        let request = CreateRequest::new(resolved, repository, id).unwrap();
        let backend_id = self.backend.create(&request).await.unwrap();
        Workspace {
            backend: self.backend.as_ref(),
            id: backend_id,
        }
    }

    fn mount(&self, source: PathBuf, target: impl Into<PathBuf>, readonly: bool) -> SetupConfig {
        SetupConfig {
            files: vec![FileMount {
                source,
                target: target.into(),
                readonly,
            }],
            ..Default::default()
        }
    }

    fn env(vars: &[(&str, &str)]) -> SetupConfig {
        SetupConfig {
            environment: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn commands(commands: &[&str]) -> SetupConfig {
        SetupConfig {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn lifecycle(&self) {
        let ws = self.workspace().await;
        assert_eq!(
            self.backend.status(&ws.id).await.state,
            WorkspaceState::Running
        );
        let (output, code) = ws.exec("echo hello").await;
        assert_eq!(code, 0);
        assert!(output.contains("hello"), "unexpected output: {output}");

        let (_, code) = ws.exec("exit 3").await;
        assert_eq!(code, 3);

        // Start and stop succeed even where the substrate has nothing to do
        self.backend.start(&ws.id).await.unwrap();
        self.backend.stop(&ws.id).await.unwrap();
        self.backend.start(&ws.id).await.unwrap();
        ws.must_exec("true").await;
        ws.finish().await;

        assert_eq!(
            self.backend.status(MISSING).await.state,
            WorkspaceState::NotFound
        );
        assert!(self.backend.exec(MISSING, "echo test").await.is_err());
    }

    async fn file_mounts(&self) {
        let ws = self.workspace().await;
        ws.setup(self.mount(self.fixture("simple.txt"), "config/app.txt", true))
            .await
            .unwrap();
        ws.assert_content("config/app.txt", "hello world").await;
        ws.finish().await;

        let ws = self.workspace().await;
        let absolute = format!("{}/absolute-test.txt", ws.id);
        ws.setup(self.mount(self.fixture("simple.txt"), &absolute, true))
            .await
            .unwrap();
        ws.assert_content(&absolute, "hello world").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(self.mount(self.fixture("simple.txt"), "readonly.txt", true))
            .await
            .unwrap();
        ws.must_exec("test -L readonly.txt").await;
        ws.assert_content("readonly.txt", "hello world").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(self.mount(self.fixture("simple.txt"), "writable.txt", false))
            .await
            .unwrap();
        ws.must_exec("test ! -L writable.txt").await;
        ws.must_exec("echo ' modified' >> writable.txt").await;
        assert!(ws.must_exec("cat writable.txt").await.contains("modified"));
        assert_eq!(
            fs::read_to_string(self.fixture("simple.txt")).unwrap(),
            "hello world"
        );
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(self.mount(self.fixture("config-dir"), "imported-config", false))
            .await
            .unwrap();
        ws.must_exec("test -d imported-config").await;
        ws.assert_content("imported-config/app.yaml", "key: value").await;
        ws.assert_content("imported-config/nested/deep.txt", "deep content")
            .await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(self.mount(self.fixture("simple.txt"), "deep/nested/path/file.txt", true))
            .await
            .unwrap();
        ws.assert_content("deep/nested/path/file.txt", "hello world")
            .await;
        ws.finish().await;

        let ws = self.workspace().await;
        let result = ws
            .setup(self.mount(PathBuf::from("/nonexistent/source/file.txt"), "dest.txt", true))
            .await;
        assert!(result.is_err(), "missing mount source must fail");
        ws.finish().await;
    }

    async fn environment(&self) {
        let ws = self.workspace().await;
        ws.setup(Self::env(&[("MY_VAR", "my_value")])).await.unwrap();
        ws.assert_env("MY_VAR", "my_value").await;
        // Every later exec sees it, not only the first
        ws.assert_env("MY_VAR", "my_value").await;
        ws.assert_env("MY_VAR", "my_value").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(Self::env(&[
            ("QUOTED", "it's got 'quotes'"),
            ("DOLLAR", "$NOT_EXPANDED"),
            ("SPACES", "value with spaces"),
            ("BACKTICK", "`whoami`"),
        ]))
        .await
        .unwrap();
        ws.assert_env("QUOTED", "it's got 'quotes'").await;
        ws.assert_env("DOLLAR", "$NOT_EXPANDED").await;
        ws.assert_env("SPACES", "value with spaces").await;
        ws.assert_env("BACKTICK", "`whoami`").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(Self::env(&[("EMPTY", "")])).await.unwrap();
        let output = ws
            .must_exec("[ -z \"${EMPTY+x}\" ] && echo UNSET || echo SET")
            .await;
        assert_eq!(output.trim(), "SET");
        ws.assert_env("EMPTY", "").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(SetupConfig::default()).await.unwrap();
        ws.must_exec("test ! -e .arbor-env").await;
        ws.finish().await;
    }

    async fn setup_commands(&self) {
        let ws = self.workspace().await;
        ws.setup(Self::commands(&[
            "echo 'first' > order.log",
            "echo 'second' >> order.log",
            "echo 'third' >> order.log",
        ]))
        .await
        .unwrap();
        ws.assert_content("order.log", "first\nsecond\nthird").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(Self::commands(&["pwd > pwd.log"])).await.unwrap();
        let expected = ws.must_exec("pwd").await;
        ws.assert_content("pwd.log", expected.trim_end()).await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(SetupConfig {
            commands: vec!["echo $SETUP_VAR > var.log".to_string()],
            ..Self::env(&[("SETUP_VAR", "available")])
        })
        .await
        .unwrap();
        ws.assert_content("var.log", "available").await;
        ws.finish().await;

        let ws = self.workspace().await;
        let err = ws
            .setup(Self::commands(&[
                "echo 'before' > fail.log",
                "exit 1",
                "echo 'after' >> fail.log",
            ]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, SetupError::CommandFailed { index: 2, .. }),
            "unexpected error: {err}"
        );
        ws.assert_content("fail.log", "before").await;
        ws.finish().await;

        let ws = self.workspace().await;
        ws.setup(Self::commands(&[])).await.unwrap();
        ws.finish().await;
    }
}
