// src/sys/docker.rs

use async_trait::async_trait;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{ExecFailure, PipelineError};
use crate::sys::artifacts::ArtifactStore;
use crate::sys::scrub::LogScrubber;
use crate::sys::traits::{ContainerEngine, ContainerSession, ContainerSpec, Directory};

/// Container backend driven through the `docker` CLI.
pub struct DockerEngine {
    docker_bin: String,
}

impl DockerEngine {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self { docker_bin: docker_bin.into() }
    }

    /// Checks the daemon answers, then sets up the session's scratch area and
    /// log printer.
    async fn open(&self) -> Result<DockerSession, PipelineError> {
        let output = Command::new(&self.docker_bin)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PipelineError::Connection(format!("failed to spawn {}: {}", self.docker_bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Connection(stderr.trim().to_string()));
        }

        let server_version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(server_version = %server_version, "connected to container backend");

        let store = ArtifactStore::new()?;
        let (log_tx, mut log_rx) = mpsc::channel::<String>(256);

        // Backend output goes to stdout, one line at a time, in arrival order.
        let printer = tokio::spawn(async move {
            while let Some(line) = log_rx.recv().await {
                println!("{}", line);
            }
        });

        Ok(DockerSession {
            docker_bin: self.docker_bin.clone(),
            store,
            scrubber: Arc::new(LogScrubber::new()),
            log_tx: Mutex::new(Some(log_tx)),
            printer: Mutex::new(Some(printer)),
            live_containers: Mutex::new(Vec::new()),
            next_container: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn connect(&self) -> Result<Box<dyn ContainerSession>, PipelineError> {
        Ok(Box::new(self.open().await?))
    }
}

pub struct DockerSession {
    docker_bin: String,
    store: ArtifactStore,
    scrubber: Arc<LogScrubber>,
    log_tx: Mutex<Option<mpsc::Sender<String>>>,
    printer: Mutex<Option<JoinHandle<()>>>,
    live_containers: Mutex<Vec<String>>,
    next_container: AtomicU64,
}

impl DockerSession {
    fn log_sender(&self) -> Option<mpsc::Sender<String>> {
        self.log_tx.lock().ok().and_then(|guard| guard.as_ref().cloned())
    }

    fn track(&self, name: &str) {
        if let Ok(mut live) = self.live_containers.lock() {
            live.push(name.to_string());
        }
    }

    fn untrack(&self, name: &str) {
        if let Ok(mut live) = self.live_containers.lock() {
            live.retain(|n| n != name);
        }
    }

    /// Starts an idle container with the workspace bind-mounted; execs follow.
    async fn start_container(&self, name: &str, spec: &ContainerSpec, workspace: &Directory) -> Result<(), ExecFailure> {
        let mount = format!("{}:{}", workspace.path().display(), spec.mount_path);
        debug!(container = name, image = %spec.image, mount = %mount, "starting container");

        let output = Command::new(&self.docker_bin)
            .args(["run", "--detach", "--rm", "--name", name])
            .args(["--entrypoint", "tail"])
            .args(["--volume", mount.as_str()])
            .args(["--workdir", spec.workdir.as_str()])
            .arg(&spec.image)
            .args(["-f", "/dev/null"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecFailure::Runtime(format!("failed to spawn docker run: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecFailure::Runtime(format!(
                "failed to start {}: {}",
                spec.image,
                self.scrubber.scrub(stderr.trim())
            )));
        }
        self.track(name);
        Ok(())
    }

    async fn exec(&self, name: &str, spec: &ContainerSpec, argv: &[String]) -> Result<(), ExecFailure> {
        let rendered = argv.join(" ");
        info!(stage = %spec.label, command = %rendered, "exec");

        let mut cmd = Command::new(&self.docker_bin);
        cmd.arg("exec").args(["--workdir", spec.workdir.as_str()]);

        // 🛡️ `-e NAME` without a value: docker copies it from its own environment,
        // so plaintext never appears in argv or in the container's stored config.
        for binding in &spec.secrets {
            cmd.args(["--env", binding.name]);
            binding.value.use_secret(|bytes| {
                cmd.env(binding.name, OsStr::from_bytes(bytes));
            });
        }

        let mut child = cmd
            .arg(name)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecFailure::Runtime(format!("failed to spawn docker exec: {}", e)))?;

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(self.forward(stdout, &spec.label));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(self.forward(stderr, &spec.label));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecFailure::Runtime(e.to_string()))?;
        for handle in forwarders {
            let _ = handle.await;
        }

        if !status.success() {
            return Err(ExecFailure::NonZeroExit {
                command: rendered,
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    fn forward<R>(&self, reader: R, label: &str) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.log_sender();
        let scrubber = Arc::clone(&self.scrubber);
        let prefix = format!("[{}]", label);
        tokio::spawn(async move {
            // Output may be non-UTF-8; the pipe is drained to EOF regardless.
            let mut chunks = SplitStream::new(BufReader::new(reader).split(b'\n'));
            while let Some(chunk) = chunks.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!("output stream closed: {}", e);
                        break;
                    }
                };
                let text = String::from_utf8_lossy(&bytes);
                let line = format!("{} {}", prefix, scrubber.scrub(text.trim_end_matches('\r')));
                match &tx {
                    Some(tx) => {
                        let _ = tx.send(line).await;
                    }
                    None => println!("{}", line),
                }
            }
        })
    }

    /// Hands everything under the mount back to the owner of the workspace, so
    /// files the container created as root can be removed from the host.
    async fn reclaim_ownership(&self, name: &str, spec: &ContainerSpec, workspace: &Directory) {
        let owner = match tokio::fs::metadata(workspace.path()).await {
            Ok(meta) => format!("{}:{}", meta.uid(), meta.gid()),
            Err(e) => {
                warn!(artifact = workspace.id(), "cannot stat workspace: {}", e);
                return;
            }
        };
        let result = Command::new(&self.docker_bin)
            .args(["exec", "--user", "0", name, "chown", "-R", owner.as_str(), spec.mount_path.as_str()])
            .stdin(Stdio::null())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => debug!(container = name, owner = %owner, "reclaimed workspace"),
            Ok(out) => warn!(
                container = name,
                "failed to reclaim workspace ownership: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => warn!(container = name, "failed to spawn docker exec: {}", e),
        }
    }

    async fn remove_container(&self, name: &str) {
        let result = Command::new(&self.docker_bin)
            .args(["rm", "--force", name])
            .stdin(Stdio::null())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => debug!(container = name, "removed container"),
            Ok(out) => warn!(
                container = name,
                "failed to remove container: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => warn!(container = name, "failed to spawn docker rm: {}", e),
        }
        self.untrack(name);
    }
}

#[async_trait]
impl ContainerSession for DockerSession {
    async fn host_directory(&self, path: &Path) -> Result<Directory, PipelineError> {
        self.store.snapshot_host(path).await
    }

    async fn run(&self, spec: &ContainerSpec, input: &Directory) -> Result<Directory, ExecFailure> {
        let workspace = self
            .store
            .fork(input)
            .await
            .map_err(|e| ExecFailure::Runtime(e.to_string()))?;

        let name = format!(
            "stagehand-{}-{}-{}",
            spec.label,
            std::process::id(),
            self.next_container.fetch_add(1, Ordering::Relaxed)
        );

        let mut result = self.start_container(&name, spec, &workspace).await;
        if result.is_ok() {
            for argv in &spec.execs {
                result = self.exec(&name, spec, argv).await;
                if result.is_err() {
                    break;
                }
            }
            self.reclaim_ownership(&name, spec, &workspace).await;
            self.remove_container(&name).await;
        }

        match result {
            Ok(()) => Ok(workspace),
            Err(e) => {
                self.store.discard(workspace).await;
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<(), PipelineError> {
        let leftovers: Vec<String> = self
            .live_containers
            .lock()
            .map(|live| live.clone())
            .unwrap_or_default();
        for name in leftovers {
            self.remove_container(&name).await;
        }

        // Closing the channel lets the printer drain and exit.
        if let Ok(mut tx) = self.log_tx.lock() {
            tx.take();
        }
        let printer = self.printer.lock().ok().and_then(|mut p| p.take());
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        self.store.close()?;
        info!("container session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::secrets::{ProviderCredential, SecretBinding};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Shell stand-in for the docker CLI. Records every argv and the region
    /// variable each exec sees; `exec` fails on `fail-here` and floods the pipe
    /// (starting with a Latin-1 byte) on `latin1`.
    const FAKE_DOCKER: &str = r#"#!/bin/sh
printf '%s\n' "$*" >> "@LOG@"
case "$1" in
  version)
    @VERSION@
    ;;
  run)
    echo 4f1c0ffee
    ;;
  exec)
    printf 'region=%s\n' "$AWS_DEFAULT_REGION" >> "@ENV@"
    case "$*" in
      *fail-here*) echo boom >&2; exit 3 ;;
      *latin1*)
        printf 'caf\351\n'
        i=0
        while [ $i -lt 20000 ]; do echo "line $i"; i=$((i+1)); done
        ;;
    esac
    ;;
esac
exit 0
"#;

    struct FakeDocker {
        dir: TempDir,
        bin: PathBuf,
    }

    impl FakeDocker {
        fn new(reachable: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let bin = dir.path().join("docker");
            let version = if reachable {
                "echo 24.0.7"
            } else {
                "echo 'Cannot connect to the Docker daemon' >&2; exit 1"
            };
            let script = FAKE_DOCKER
                .replace("@LOG@", &dir.path().join("argv.log").display().to_string())
                .replace("@ENV@", &dir.path().join("env.log").display().to_string())
                .replace("@VERSION@", version);
            fs::write(&bin, script).unwrap();
            fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
            Self { dir, bin }
        }

        fn engine(&self) -> DockerEngine {
            DockerEngine::new(self.bin.display().to_string())
        }

        fn read(&self, file: &str) -> Vec<String> {
            fs::read_to_string(self.dir.path().join(file))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn calls(&self) -> Vec<String> {
            self.read("argv.log")
        }
    }

    fn project() -> TempDir {
        let host = tempfile::tempdir().unwrap();
        fs::write(host.path().join("package.json"), r#"{"name":"app"}"#).unwrap();
        host
    }

    fn node_spec() -> ContainerSpec {
        ContainerSpec::from_image("node:18")
            .with_label("install")
            .with_mounted_directory("/src")
    }

    #[tokio::test]
    async fn unreachable_daemon_is_a_connection_error() {
        let fake = FakeDocker::new(false);
        let err = fake.engine().connect().await.err().unwrap();
        assert!(matches!(err, PipelineError::Connection(ref m) if m.contains("Cannot connect")));
    }

    #[tokio::test]
    async fn missing_cli_is_a_connection_error() {
        let err = DockerEngine::new("/nonexistent/docker").connect().await.err().unwrap();
        assert!(matches!(err, PipelineError::Connection(_)));
    }

    #[tokio::test]
    async fn non_utf8_output_does_not_break_the_exec() {
        let fake = FakeDocker::new(true);
        let host = project();
        let session = fake.engine().open().await.unwrap();
        let source = session.host_directory(host.path()).await.unwrap();

        let spec = node_spec().with_exec(["latin1"]);
        let result = session.run(&spec, &source).await;

        assert!(result.is_ok(), "{:?}", result.err());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn secret_values_stay_out_of_argv() {
        let fake = FakeDocker::new(true);
        let host = project();
        let session = fake.engine().open().await.unwrap();
        let source = session.host_directory(host.path()).await.unwrap();

        let spec = node_spec()
            .with_secret_variable(SecretBinding {
                name: "AWS_DEFAULT_REGION",
                value: Arc::new(ProviderCredential::new(b"eu-central-1".to_vec())),
            })
            .with_exec(["cdk", "deploy"]);
        session.run(&spec, &source).await.unwrap();
        session.close().await.unwrap();

        let calls = fake.calls();
        let exec = calls.iter().find(|c| c.ends_with("cdk deploy")).unwrap();
        assert!(exec.contains("--env AWS_DEFAULT_REGION"));
        assert!(calls.iter().all(|c| !c.contains("eu-central-1")));
        assert!(fake.read("env.log").contains(&"region=eu-central-1".to_string()));
    }

    #[tokio::test]
    async fn execs_stop_at_first_failure_and_workspace_is_discarded() {
        let fake = FakeDocker::new(true);
        let host = project();
        let session = fake.engine().open().await.unwrap();
        let source = session.host_directory(host.path()).await.unwrap();

        let spec = node_spec()
            .with_exec(["npm", "ci"])
            .with_exec(["fail-here"])
            .with_exec(["npm", "run", "build"]);
        let err = session.run(&spec, &source).await.unwrap_err();

        assert!(matches!(err, ExecFailure::NonZeroExit { ref command, code: 3 } if command == "fail-here"));
        let calls = fake.calls();
        assert!(calls.iter().any(|c| c.ends_with("npm ci")));
        assert!(calls.iter().all(|c| !c.ends_with("npm run build")));
        assert!(calls.iter().any(|c| c.starts_with("rm --force stagehand-install-")));

        let remaining: Vec<_> = fs::read_dir(session.store.root()).unwrap().collect();
        assert_eq!(remaining.len(), 1, "only the source snapshot survives");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn workspace_ownership_is_reclaimed_before_removal() {
        let fake = FakeDocker::new(true);
        let host = project();
        let session = fake.engine().open().await.unwrap();
        let source = session.host_directory(host.path()).await.unwrap();

        let out = session.run(&node_spec().with_exec(["npm", "ci"]), &source).await.unwrap();
        let meta = fs::metadata(out.path()).unwrap();
        session.close().await.unwrap();

        let calls = fake.calls();
        let owner = format!("{}:{}", meta.uid(), meta.gid());
        let chown = calls.iter().position(|c| c.contains(&format!("chown -R {} /src", owner))).unwrap();
        let rm = calls.iter().position(|c| c.starts_with("rm --force")).unwrap();
        assert!(chown < rm);
    }

    #[tokio::test]
    async fn close_removes_containers_still_running() {
        let fake = FakeDocker::new(true);
        let host = project();
        let session = fake.engine().open().await.unwrap();
        let source = session.host_directory(host.path()).await.unwrap();

        session.start_container("stagehand-orphan", &node_spec(), &source).await.unwrap();
        let scratch = session.store.root().to_path_buf();
        session.close().await.unwrap();

        assert!(fake.calls().contains(&"rm --force stagehand-orphan".to_string()));
        assert!(session.live_containers.lock().unwrap().is_empty());
        assert!(!scratch.exists());
    }
}
